//! Compilation environment: declared variables, function overloads and cost estimators.
//!
//! An [`Env`] is immutable once built and is shared behind an `Arc` by every program
//! compiled from it, so concurrent compilation and evaluation need no locking.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::ast::Ast;
use crate::checker;
use crate::cost::ActualCostEstimator;
use crate::error::{CompileError, EvalError, Issue};
use crate::library::standard::Standard;
use crate::parser;
use crate::program::{Program, ProgramOptions};
use crate::value::Value;

/// Static types as far as the checker tracks them; `Dyn` unifies with everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Dyn,
    Null,
    Bool,
    Int,
    Uint,
    Double,
    String,
    List,
    Map,
    /// Type values, as returned by `type()` and denoted by the type identifiers.
    Meta,
}

impl Type {
    pub fn accepts(self, actual: Type) -> bool { self == Type::Dyn || actual == Type::Dyn || self == actual }

    pub fn of(v: &Value) -> Type {
        match v {
            Value::Null => Type::Null,
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Uint(_) => Type::Uint,
            Value::Double(_) => Type::Double,
            Value::String(_) => Type::String,
            Value::List(_) => Type::List,
            Value::Map(_) => Type::Map,
            Value::Type(_) => Type::Meta,
        }
    }

    /// Runtime name; also the identifier that denotes the type in expressions.
    pub fn name(self) -> &'static str {
        match self {
            Type::Dyn => "dyn",
            Type::Null => "null_type",
            Type::Bool => "bool",
            Type::Int => "int",
            Type::Uint => "uint",
            Type::Double => "double",
            Type::String => "string",
            Type::List => "list",
            Type::Map => "map",
            Type::Meta => "type",
        }
    }

    pub fn named(name: &str) -> Option<Type> {
        [Type::Dyn, Type::Null, Type::Bool, Type::Int, Type::Uint, Type::Double, Type::String, Type::List, Type::Map, Type::Meta]
            .into_iter()
            .find(|t| t.name() == name)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Type::Dyn => "dyn",
            Type::Null => "null_type",
            Type::Bool => "bool",
            Type::Int => "int",
            Type::Uint => "uint",
            Type::Double => "double",
            Type::String => "string",
            Type::List => "list(dyn)",
            Type::Map => "map(dyn, dyn)",
            Type::Meta => "type",
        };
        f.write_str(s)
    }
}

pub type FunctionImpl = Arc<dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync>;

/// One callable signature. For receiver-style overloads `args[0]` passed to the
/// implementation is the receiver.
#[derive(Clone)]
pub struct Overload {
    pub id: String,
    pub receiver: Option<Type>,
    pub params: Vec<Type>,
    pub result: Type,
    pub imp: FunctionImpl,
}

impl fmt::Debug for Overload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overload").field("id", &self.id).field("receiver", &self.receiver).field("params", &self.params).finish()
    }
}

impl Overload {
    pub fn global<F>(id: &str, params: &[Type], result: Type, imp: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Self { id: id.to_string(), receiver: None, params: params.to_vec(), result, imp: Arc::new(imp) }
    }

    pub fn member<F>(id: &str, receiver: Type, params: &[Type], result: Type, imp: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Self { id: id.to_string(), receiver: Some(receiver), params: params.to_vec(), result, imp: Arc::new(imp) }
    }

    pub(crate) fn matches_static(&self, receiver: Option<Type>, args: &[Type]) -> bool {
        let recv_ok = match (self.receiver, receiver) {
            (None, None) => true,
            (Some(want), Some(got)) => want.accepts(got),
            _ => false,
        };
        recv_ok && self.params.len() == args.len() && self.params.iter().zip(args).all(|(p, a)| p.accepts(*a))
    }

    pub(crate) fn matches_runtime(&self, receiver: Option<&Value>, args: &[Value]) -> bool {
        self.matches_static(receiver.map(Type::of), &args.iter().map(Type::of).collect::<Vec<_>>())
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub overloads: Vec<Overload>,
}

impl Function {
    pub fn new(name: &str, overloads: Vec<Overload>) -> Self { Self { name: name.to_string(), overloads } }
}

/// A bundle of functions (and optionally their runtime cost model) added to an environment.
pub trait Library: Send + Sync {
    fn name(&self) -> &'static str;
    fn functions(&self) -> Vec<Function>;
    fn cost_estimator(&self) -> Option<Arc<dyn ActualCostEstimator>> { None }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("variable {0} declared twice")]
    DuplicateVariable(String),
    #[error("overload {0} declared twice")]
    DuplicateOverload(String),
}

pub struct Env {
    variables: FxHashMap<String, Type>,
    functions: FxHashMap<String, Function>,
    estimators: Vec<Arc<dyn ActualCostEstimator>>,
    libraries: Vec<&'static str>,
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env").field("variables", &self.variables).field("libraries", &self.libraries).finish()
    }
}

impl Env {
    pub fn builder() -> EnvBuilder { EnvBuilder::default() }

    pub fn variable(&self, name: &str) -> Option<Type> { self.variables.get(name).copied() }

    pub fn function(&self, name: &str) -> Option<&Function> { self.functions.get(name) }

    pub fn libraries(&self) -> &[&'static str] { &self.libraries }

    pub(crate) fn estimators(&self) -> &[Arc<dyn ActualCostEstimator>] { &self.estimators }

    /// Parse and type-check `src`.
    pub fn compile(&self, src: &str) -> Result<Ast, CompileError> {
        let root = parser::parse(src).map_err(|issue| CompileError::single(src, issue))?;
        let issues: Vec<Issue> = checker::check(self, src, &root);
        if !issues.is_empty() {
            return Err(CompileError::new(src, issues));
        }
        Ok(Ast { source: Arc::from(src), root: Arc::new(root) })
    }

    /// Instantiate an executable program for a checked AST.
    pub fn program(self: &Arc<Self>, ast: &Ast, options: ProgramOptions) -> Result<Program, ProgramError> {
        if options.cost_limit == Some(0) {
            return Err(ProgramError::InvalidOption("cost limit must be positive".into()));
        }
        Ok(Program::new(Arc::clone(self), ast.clone(), options))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProgramError {
    #[error("invalid program option: {0}")]
    InvalidOption(String),
}

pub struct EnvBuilder {
    variables: Vec<(String, Type)>,
    libraries: Vec<Arc<dyn Library>>,
}

impl Default for EnvBuilder {
    fn default() -> Self { Self { variables: Vec::new(), libraries: vec![Arc::new(Standard)] } }
}

impl EnvBuilder {
    pub fn variable(mut self, name: &str, ty: Type) -> Self {
        self.variables.push((name.to_string(), ty));
        self
    }

    pub fn library(mut self, lib: impl Library + 'static) -> Self {
        self.libraries.push(Arc::new(lib));
        self
    }

    pub fn shared_library(mut self, lib: Arc<dyn Library>) -> Self {
        self.libraries.push(lib);
        self
    }

    pub fn build(self) -> Result<Arc<Env>, EnvError> {
        let mut variables = FxHashMap::default();
        for (name, ty) in self.variables {
            if variables.insert(name.clone(), ty).is_some() {
                return Err(EnvError::DuplicateVariable(name));
            }
        }
        let mut functions: FxHashMap<String, Function> = FxHashMap::default();
        let mut estimators = Vec::new();
        let mut libraries = Vec::new();
        let mut seen_ids = rustc_hash::FxHashSet::default();
        for lib in self.libraries {
            libraries.push(lib.name());
            for f in lib.functions() {
                for o in &f.overloads {
                    if !seen_ids.insert(o.id.clone()) {
                        return Err(EnvError::DuplicateOverload(o.id.clone()));
                    }
                }
                functions.entry(f.name.clone()).or_insert_with(|| Function::new(&f.name, vec![])).overloads.extend(f.overloads);
            }
            if let Some(est) = lib.cost_estimator() {
                estimators.push(est);
            }
        }
        Ok(Arc::new(Env { variables, functions, estimators, libraries }))
    }
}

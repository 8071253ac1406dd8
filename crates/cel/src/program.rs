use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use crate::ast::Ast;
use crate::env::Env;
use crate::error::EvalError;
use crate::interpreter::Interpreter;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramOptions {
    /// Abort with `operation cancelled: actual cost limit exceeded` past this many units.
    pub cost_limit: Option<u64>,
    /// Report the actual cost in [`EvalDetails`].
    pub track_cost: bool,
    /// Check the cancellation token every N comprehension iterations; 0 disables checks.
    pub interrupt_check_frequency: u32,
}

impl Default for ProgramOptions {
    fn default() -> Self { Self { cost_limit: None, track_cost: true, interrupt_check_frequency: 0 } }
}

/// Variable bindings for one evaluation.
#[derive(Debug, Clone, Default)]
pub struct Activation {
    vars: FxHashMap<String, Value>,
}

impl Activation {
    pub fn new() -> Self { Self::default() }

    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.vars.insert(name.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Value>) { self.vars.insert(name.to_string(), value.into()); }

    pub fn get(&self, name: &str) -> Option<&Value> { self.vars.get(name) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalDetails {
    actual_cost: Option<u64>,
}

impl EvalDetails {
    /// `None` when the program was instantiated without cost tracking.
    pub fn actual_cost(&self) -> Option<u64> { self.actual_cost }
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub result: Result<Value, EvalError>,
    pub details: EvalDetails,
}

/// A compiled expression bound to its environment. Cheap to share; evaluation takes `&self`.
pub struct Program {
    env: Arc<Env>,
    ast: Ast,
    options: ProgramOptions,
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program").field("source", &self.ast.source()).field("options", &self.options).finish()
    }
}

impl Program {
    pub(crate) fn new(env: Arc<Env>, ast: Ast, options: ProgramOptions) -> Self { Self { env, ast, options } }

    pub fn source(&self) -> &str { self.ast.source() }

    pub fn options(&self) -> ProgramOptions { self.options }

    pub fn eval(&self, activation: &Activation) -> Evaluation { self.run(activation, None) }

    /// Evaluate, giving up with `operation interrupted` once `cancel` fires.
    pub fn eval_with_cancel(&self, activation: &Activation, cancel: &CancellationToken) -> Evaluation {
        self.run(activation, Some(cancel))
    }

    fn run(&self, activation: &Activation, cancel: Option<&CancellationToken>) -> Evaluation {
        let mut interp = Interpreter::new(&self.env, activation, self.options.cost_limit, cancel, self.options.interrupt_check_frequency);
        let result = interp.eval(self.ast.expr());
        let tracked = self.options.track_cost || self.options.cost_limit.is_some();
        Evaluation { result, details: EvalDetails { actual_cost: tracked.then(|| interp.cost()) } }
    }
}

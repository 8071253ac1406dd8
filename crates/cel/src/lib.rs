//! OCM CEL: a cost-tracked evaluator for the Common Expression Language subset used by
//! placement predicates.
//!
//! Expressions are compiled once against an immutable [`Env`] and evaluated many times:
//!
//! ```ignore
//! let env = Env::builder().variable("labels", Type::Map).library(Strings).build()?;
//! let ast = env.compile(r#"labels["env"] == "prod""#)?;
//! let prg = env.program(&ast, ProgramOptions { cost_limit: Some(1_000_000), ..Default::default() })?;
//! let out = prg.eval(&Activation::new().bind("labels", labels));
//! ```

#![forbid(unsafe_code)]

pub mod ast;
mod checker;
pub mod cost;
pub mod env;
pub mod error;
mod interpreter;
mod lexer;
pub mod library;
mod parser;
pub mod program;
pub mod value;

pub use ast::Ast;
pub use cost::ActualCostEstimator;
pub use env::{Env, EnvBuilder, EnvError, Function, Library, Overload, ProgramError, Type};
pub use error::{CompileError, EvalError, Issue};
pub use program::{Activation, EvalDetails, Evaluation, Program, ProgramOptions};
pub use value::{Key, Value};

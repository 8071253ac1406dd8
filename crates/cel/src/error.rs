use std::fmt;

/// A single compile diagnostic with a 1-based source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl Issue {
    pub(crate) fn at(src: &str, offset: usize, message: impl Into<String>) -> Self {
        let offset = offset.min(src.len());
        let before = &src[..offset];
        let line = before.matches('\n').count() + 1;
        let column = before.rsplit('\n').next().map(|l| l.chars().count()).unwrap_or(0) + 1;
        Self { line, column, message: message.into() }
    }
}

/// Parse or check failure. Renders like `ERROR: <input>:1:1: undeclared reference to 'x' (in container '')`
/// followed by a caret snippet for every issue.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{rendered}")]
pub struct CompileError {
    pub issues: Vec<Issue>,
    rendered: String,
}

impl CompileError {
    pub(crate) fn new(src: &str, issues: Vec<Issue>) -> Self {
        let mut rendered = String::new();
        for (i, issue) in issues.iter().enumerate() {
            if i > 0 {
                rendered.push('\n');
            }
            let line_text = src.lines().nth(issue.line - 1).unwrap_or("");
            let _ = fmt::write(
                &mut rendered,
                format_args!(
                    "ERROR: <input>:{}:{}: {}\n | {}\n | {}^",
                    issue.line,
                    issue.column,
                    issue.message,
                    line_text,
                    ".".repeat(issue.column.saturating_sub(1))
                ),
            );
        }
        Self { issues, rendered }
    }

    pub(crate) fn single(src: &str, issue: Issue) -> Self { Self::new(src, vec![issue]) }
}

/// Runtime evaluation failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("no such key: {0}")]
    NoSuchKey(String),
    #[error("no such attribute: {0}")]
    NoSuchAttribute(String),
    #[error("index out of range: {0}")]
    IndexOutOfRange(i64),
    #[error("no such overload: {0}")]
    NoSuchOverload(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("modulus by zero")]
    ModulusByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("operation cancelled: actual cost limit exceeded")]
    CostLimitExceeded,
    #[error("operation interrupted")]
    Interrupted,
    #[error("{0}")]
    Function(String),
}

impl EvalError {
    pub fn function(msg: impl Into<String>) -> Self { EvalError::Function(msg.into()) }
}

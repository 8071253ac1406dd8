//! Parsed expression tree. Macros are already expanded into `Comprehension` nodes.

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(Arc<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// Byte offset of the node in the source, used for diagnostics.
    pub pos: usize,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Ident(String),
    /// `operand.field`; `test_only` marks a `has()` presence test.
    Select { operand: Box<Expr>, field: String, test_only: bool },
    Index { operand: Box<Expr>, index: Box<Expr> },
    Call { function: String, target: Option<Box<Expr>>, args: Vec<Expr> },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Comprehension(Box<Comprehension>),
    /// Loop guard of `all`/`exists`: true unless the operand is exactly `false`.
    NotStrictlyFalse(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub iter_var: String,
    pub iter_range: Expr,
    pub accu_var: String,
    pub accu_init: Expr,
    pub loop_condition: Expr,
    pub loop_step: Expr,
    pub result: Expr,
}

/// Accumulator variable introduced by macro expansion; not a legal user identifier.
pub const ACCU_VAR: &str = "@result";

impl Expr {
    pub fn new(pos: usize, kind: ExprKind) -> Self { Self { pos, kind } }

    pub(crate) fn boxed(pos: usize, kind: ExprKind) -> Box<Self> { Box::new(Self { pos, kind }) }

    /// Direct sub-expressions, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Ident(_) => Vec::new(),
            ExprKind::Select { operand, .. } => vec![&**operand],
            ExprKind::Index { operand, index } => vec![&**operand, &**index],
            ExprKind::Call { target, args, .. } => target.as_deref().into_iter().chain(args).collect(),
            ExprKind::Unary(_, e) | ExprKind::NotStrictlyFalse(e) => vec![&**e],
            ExprKind::Binary(_, l, r) | ExprKind::And(l, r) | ExprKind::Or(l, r) => vec![&**l, &**r],
            ExprKind::Conditional(c, t, o) => vec![&**c, &**t, &**o],
            ExprKind::List(items) => items.iter().collect(),
            ExprKind::Map(entries) => entries.iter().flat_map(|(k, v)| [k, v]).collect(),
            ExprKind::Comprehension(c) => vec![&c.iter_range, &c.accu_init, &c.loop_condition, &c.loop_step, &c.result],
        }
    }

    /// Number of nodes on the longest root-to-leaf path; computed without recursion.
    pub fn height(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 1)];
        while let Some((e, depth)) = stack.pop() {
            max = max.max(depth);
            stack.extend(e.children().into_iter().map(|c| (c, depth + 1)));
        }
        max
    }
}

/// A checked expression ready for program instantiation.
#[derive(Debug, Clone)]
pub struct Ast {
    pub(crate) source: Arc<str>,
    pub(crate) root: Arc<Expr>,
}

impl Ast {
    pub fn source(&self) -> &str { &self.source }
    pub fn expr(&self) -> &Expr { &self.root }
}

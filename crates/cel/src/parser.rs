//! Recursive-descent parser producing [`Expr`] trees, with macro expansion.

use std::sync::Arc;

use crate::ast::{BinaryOp, Comprehension, Expr, ExprKind, Literal, UnaryOp, ACCU_VAR};
use crate::error::Issue;
use crate::lexer::{Lexer, Tok, Token};

/// Maximum height of a parsed tree. Checking and evaluation recurse at most this deep.
pub const MAX_DEPTH: usize = 250;
/// Maximum expression length in code points.
pub const MAX_EXPRESSION_SIZE: usize = 100_000;

pub fn parse(src: &str) -> Result<Expr, Issue> {
    let size = src.chars().count();
    if size > MAX_EXPRESSION_SIZE {
        return Err(Issue::at(src, 0, format!("expression code point size exceeds limit: size: {}, limit {}", size, MAX_EXPRESSION_SIZE)));
    }
    let tokens = Lexer::new(src).tokenize()?;
    let mut p = Parser { src, tokens, idx: 0, depth: 0 };
    let expr = p.expr()?;
    if p.peek() != &Tok::Eof {
        return Err(p.unexpected());
    }
    if expr.height() > MAX_DEPTH {
        return Err(Issue::at(src, expr.pos, "expression recursion limit exceeded"));
    }
    Ok(expr)
}

/// Join `terms` pairwise into a balanced tree; `ops[i]` is the position of the operator
/// between `terms[i]` and `terms[i + 1]`.
fn balance(terms: Vec<Expr>, mut ops: Vec<usize>, join: fn(Box<Expr>, Box<Expr>) -> ExprKind) -> Expr {
    let mut terms = match <[Expr; 1]>::try_from(terms) {
        Ok([only]) => return only,
        Err(terms) => terms,
    };
    let mid = terms.len() / 2;
    let right = terms.split_off(mid);
    let right_ops = ops.split_off(mid);
    let pos = ops.pop().unwrap_or_default();
    let lhs = balance(terms, ops, join);
    let rhs = balance(right, right_ops, join);
    Expr::new(pos, join(Box::new(lhs), Box::new(rhs)))
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    idx: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Tok { &self.tokens[self.idx.min(self.tokens.len() - 1)].tok }
    fn pos(&self) -> usize { self.tokens[self.idx.min(self.tokens.len() - 1)].pos }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.idx.min(self.tokens.len() - 1)].clone();
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
        t
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), Issue> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(Issue::at(self.src, self.pos(), format!("Syntax error: expected {} but found {}", what, describe(self.peek()))))
        }
    }

    fn unexpected(&self) -> Issue {
        Issue::at(self.src, self.pos(), format!("Syntax error: unexpected {}", describe(self.peek())))
    }

    fn enter(&mut self) -> Result<(), Issue> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(Issue::at(self.src, self.pos(), "expression recursion limit exceeded"));
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr, Issue> {
        self.enter()?;
        let cond = self.or()?;
        let out = if self.peek() == &Tok::Question {
            let pos = self.bump().pos;
            let then = self.or()?;
            self.expect(Tok::Colon, "':'")?;
            let otherwise = self.expr()?;
            Expr::new(pos, ExprKind::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)))
        } else {
            cond
        };
        self.depth -= 1;
        Ok(out)
    }

    // `&&` and `||` chains are associative, so they are built balanced rather than left-deep.
    fn or(&mut self) -> Result<Expr, Issue> {
        let (mut terms, mut ops) = (vec![self.and()?], Vec::new());
        while self.peek() == &Tok::OrOr {
            ops.push(self.bump().pos);
            terms.push(self.and()?);
        }
        Ok(balance(terms, ops, ExprKind::Or))
    }

    fn and(&mut self) -> Result<Expr, Issue> {
        let (mut terms, mut ops) = (vec![self.relation()?], Vec::new());
        while self.peek() == &Tok::AndAnd {
            ops.push(self.bump().pos);
            terms.push(self.relation()?);
        }
        Ok(balance(terms, ops, ExprKind::And))
    }

    /// Release the levels a loop-built chain charged through `enter`.
    fn leave(&mut self, n: usize) { self.depth -= n; }

    fn relation(&mut self) -> Result<Expr, Issue> {
        let mut lhs = self.addition()?;
        let mut chain = 0;
        loop {
            let op = match self.peek() {
                Tok::EqEq => BinaryOp::Eq,
                Tok::NotEq => BinaryOp::Ne,
                Tok::Lt => BinaryOp::Lt,
                Tok::Le => BinaryOp::Le,
                Tok::Gt => BinaryOp::Gt,
                Tok::Ge => BinaryOp::Ge,
                Tok::In => BinaryOp::In,
                _ => break,
            };
            self.enter()?;
            chain += 1;
            let pos = self.bump().pos;
            let rhs = self.addition()?;
            lhs = Expr::new(pos, ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        self.leave(chain);
        Ok(lhs)
    }

    fn addition(&mut self) -> Result<Expr, Issue> {
        let mut lhs = self.multiplication()?;
        let mut chain = 0;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinaryOp::Add,
                Tok::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.enter()?;
            chain += 1;
            let pos = self.bump().pos;
            let rhs = self.multiplication()?;
            lhs = Expr::new(pos, ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        self.leave(chain);
        Ok(lhs)
    }

    fn multiplication(&mut self) -> Result<Expr, Issue> {
        let mut lhs = self.unary()?;
        let mut chain = 0;
        loop {
            let op = match self.peek() {
                Tok::Star => BinaryOp::Mul,
                Tok::Slash => BinaryOp::Div,
                Tok::Percent => BinaryOp::Rem,
                _ => break,
            };
            self.enter()?;
            chain += 1;
            let pos = self.bump().pos;
            let rhs = self.unary()?;
            lhs = Expr::new(pos, ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        self.leave(chain);
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, Issue> {
        self.enter()?;
        let out = match self.peek() {
            Tok::Bang => {
                let pos = self.bump().pos;
                let operand = self.unary()?;
                Expr::new(pos, ExprKind::Unary(UnaryOp::Not, Box::new(operand)))
            }
            Tok::Minus => {
                let pos = self.bump().pos;
                match self.peek().clone() {
                    Tok::Int(v) => {
                        self.bump();
                        let n = if v == i64::MIN.unsigned_abs() {
                            i64::MIN
                        } else {
                            let n = i64::try_from(v).map_err(|_| Issue::at(self.src, pos, "Syntax error: integer literal out of range"))?;
                            -n
                        };
                        self.member(Expr::new(pos, ExprKind::Literal(Literal::Int(n))))?
                    }
                    Tok::Double(v) => {
                        self.bump();
                        self.member(Expr::new(pos, ExprKind::Literal(Literal::Double(-v))))?
                    }
                    _ => {
                        let operand = self.unary()?;
                        Expr::new(pos, ExprKind::Unary(UnaryOp::Neg, Box::new(operand)))
                    }
                }
            }
            _ => {
                let primary = self.primary()?;
                self.member(primary)?
            }
        };
        self.depth -= 1;
        Ok(out)
    }

    fn member(&mut self, mut operand: Expr) -> Result<Expr, Issue> {
        let mut chain = 0;
        loop {
            if matches!(self.peek(), Tok::Dot | Tok::LBracket) {
                self.enter()?;
                chain += 1;
            }
            match self.peek() {
                Tok::Dot => {
                    let dot = self.bump().pos;
                    let name = self.ident("field name")?;
                    if self.peek() == &Tok::LParen {
                        self.bump();
                        let args = self.args(Tok::RParen)?;
                        operand = self.receiver_call(dot, operand, name, args)?;
                    } else {
                        operand = Expr::new(dot, ExprKind::Select { operand: Box::new(operand), field: name, test_only: false });
                    }
                }
                Tok::LBracket => {
                    let pos = self.bump().pos;
                    let index = self.expr()?;
                    self.expect(Tok::RBracket, "']'")?;
                    operand = Expr::new(pos, ExprKind::Index { operand: Box::new(operand), index: Box::new(index) });
                }
                _ => {
                    self.leave(chain);
                    return Ok(operand);
                }
            }
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, Issue> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.bump();
                Ok(name)
            }
            other => Err(Issue::at(self.src, self.pos(), format!("Syntax error: expected {} but found {}", what, describe(&other)))),
        }
    }

    fn args(&mut self, close: Tok) -> Result<Vec<Expr>, Issue> {
        let mut out = Vec::new();
        if self.eat(&close) {
            return Ok(out);
        }
        loop {
            out.push(self.expr()?);
            if self.eat(&close) {
                return Ok(out);
            }
            self.expect(Tok::Comma, "','")?;
            // trailing comma
            if self.eat(&close) {
                return Ok(out);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, Issue> {
        let Token { tok, pos } = self.bump();
        let kind = match tok {
            Tok::Int(v) => {
                let n = i64::try_from(v).map_err(|_| Issue::at(self.src, pos, "Syntax error: integer literal out of range"))?;
                ExprKind::Literal(Literal::Int(n))
            }
            Tok::Uint(v) => ExprKind::Literal(Literal::Uint(v)),
            Tok::Double(v) => ExprKind::Literal(Literal::Double(v)),
            Tok::Str(s) => ExprKind::Literal(Literal::String(Arc::from(s))),
            Tok::True => ExprKind::Literal(Literal::Bool(true)),
            Tok::False => ExprKind::Literal(Literal::Bool(false)),
            Tok::Null => ExprKind::Literal(Literal::Null),
            Tok::Dot => {
                let name = self.ident("identifier")?;
                return self.ident_or_call(pos, name);
            }
            Tok::Ident(name) => return self.ident_or_call(pos, name),
            Tok::LParen => {
                let inner = self.expr()?;
                self.expect(Tok::RParen, "')'")?;
                return Ok(inner);
            }
            Tok::LBracket => ExprKind::List(self.args(Tok::RBracket)?),
            Tok::LBrace => ExprKind::Map(self.map_entries()?),
            other => {
                return Err(Issue::at(self.src, pos, format!("Syntax error: unexpected {}", describe(&other))));
            }
        };
        Ok(Expr::new(pos, kind))
    }

    fn ident_or_call(&mut self, pos: usize, name: String) -> Result<Expr, Issue> {
        if self.peek() != &Tok::LParen {
            return Ok(Expr::new(pos, ExprKind::Ident(name)));
        }
        self.bump();
        let mut args = self.args(Tok::RParen)?;
        if name == "has" && args.len() == 1 {
            return match args.pop().map(|a| (a.pos, a.kind)) {
                Some((p, ExprKind::Select { operand, field, .. })) => {
                    Ok(Expr::new(p, ExprKind::Select { operand, field, test_only: true }))
                }
                _ => Err(Issue::at(self.src, pos, "invalid argument to has() macro")),
            };
        }
        Ok(Expr::new(pos, ExprKind::Call { function: name, target: None, args }))
    }

    fn map_entries(&mut self) -> Result<Vec<(Expr, Expr)>, Issue> {
        let mut out = Vec::new();
        if self.eat(&Tok::RBrace) {
            return Ok(out);
        }
        loop {
            let k = self.expr()?;
            self.expect(Tok::Colon, "':'")?;
            let v = self.expr()?;
            out.push((k, v));
            if self.eat(&Tok::RBrace) {
                return Ok(out);
            }
            self.expect(Tok::Comma, "','")?;
            if self.eat(&Tok::RBrace) {
                return Ok(out);
            }
        }
    }

    fn receiver_call(&self, pos: usize, target: Expr, name: String, mut args: Vec<Expr>) -> Result<Expr, Issue> {
        let is_macro = matches!(
            (name.as_str(), args.len()),
            ("all", 2) | ("exists", 2) | ("exists_one", 2) | ("map", 2) | ("map", 3) | ("filter", 2)
        );
        if !is_macro {
            return Ok(Expr::new(pos, ExprKind::Call { function: name, target: Some(Box::new(target)), args }));
        }
        let iter_var = match &args[0].kind {
            ExprKind::Ident(v) => v.clone(),
            _ => return Err(Issue::at(self.src, args[0].pos, "argument must be a simple name")),
        };
        let body = args.pop().ok_or_else(|| Issue::at(self.src, pos, "missing macro argument"))?;
        let filter = if args.len() == 2 { args.pop() } else { None };
        Ok(expand_macro(pos, &name, iter_var, target, filter, body))
    }
}

fn expand_macro(pos: usize, name: &str, iter_var: String, range: Expr, filter: Option<Expr>, body: Expr) -> Expr {
    let lit = |l: Literal| Expr::new(pos, ExprKind::Literal(l));
    let accu = || Expr::new(pos, ExprKind::Ident(ACCU_VAR.to_string()));
    let append = |item: Expr| {
        Expr::new(pos, ExprKind::Binary(BinaryOp::Add, Box::new(accu()), Expr::boxed(pos, ExprKind::List(vec![item]))))
    };
    let (init, cond, step, result) = match name {
        "all" => (
            lit(Literal::Bool(true)),
            Expr::new(pos, ExprKind::NotStrictlyFalse(Box::new(accu()))),
            Expr::new(pos, ExprKind::And(Box::new(accu()), Box::new(body))),
            accu(),
        ),
        "exists" => (
            lit(Literal::Bool(false)),
            Expr::new(pos, ExprKind::NotStrictlyFalse(Expr::boxed(pos, ExprKind::Unary(UnaryOp::Not, Box::new(accu()))))),
            Expr::new(pos, ExprKind::Or(Box::new(accu()), Box::new(body))),
            accu(),
        ),
        "exists_one" => (
            lit(Literal::Int(0)),
            lit(Literal::Bool(true)),
            Expr::new(
                pos,
                ExprKind::Conditional(
                    Box::new(body),
                    Expr::boxed(pos, ExprKind::Binary(BinaryOp::Add, Box::new(accu()), Box::new(lit(Literal::Int(1))))),
                    Box::new(accu()),
                ),
            ),
            Expr::new(pos, ExprKind::Binary(BinaryOp::Eq, Box::new(accu()), Box::new(lit(Literal::Int(1))))),
        ),
        "filter" => {
            let item = Expr::new(pos, ExprKind::Ident(iter_var.clone()));
            (
                Expr::new(pos, ExprKind::List(vec![])),
                lit(Literal::Bool(true)),
                Expr::new(pos, ExprKind::Conditional(Box::new(body), Box::new(append(item)), Box::new(accu()))),
                accu(),
            )
        }
        // map, with or without a filter
        _ => {
            let step = match filter {
                Some(f) => Expr::new(pos, ExprKind::Conditional(Box::new(f), Box::new(append(body)), Box::new(accu()))),
                None => append(body),
            };
            (Expr::new(pos, ExprKind::List(vec![])), lit(Literal::Bool(true)), step, accu())
        }
    };
    Expr::new(
        pos,
        ExprKind::Comprehension(Box::new(Comprehension {
            iter_var,
            iter_range: range,
            accu_var: ACCU_VAR.to_string(),
            accu_init: init,
            loop_condition: cond,
            loop_step: step,
            result,
        })),
    )
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Eof => "end of input".to_string(),
        Tok::Ident(s) => format!("'{}'", s),
        Tok::Str(s) => format!("'\"{}\"'", s),
        Tok::Int(v) => format!("'{}'", v),
        Tok::Uint(v) => format!("'{}u'", v),
        Tok::Double(v) => format!("'{}'", v),
        other => format!("'{}'", symbol(other)),
    }
}

fn symbol(tok: &Tok) -> &'static str {
    match tok {
        Tok::True => "true",
        Tok::False => "false",
        Tok::Null => "null",
        Tok::In => "in",
        Tok::LParen => "(",
        Tok::RParen => ")",
        Tok::LBracket => "[",
        Tok::RBracket => "]",
        Tok::LBrace => "{",
        Tok::RBrace => "}",
        Tok::Dot => ".",
        Tok::Comma => ",",
        Tok::Colon => ":",
        Tok::Question => "?",
        Tok::Plus => "+",
        Tok::Minus => "-",
        Tok::Star => "*",
        Tok::Slash => "/",
        Tok::Percent => "%",
        Tok::Bang => "!",
        Tok::EqEq => "==",
        Tok::NotEq => "!=",
        Tok::Lt => "<",
        Tok::Le => "<=",
        Tok::Gt => ">",
        Tok::Ge => ">=",
        Tok::AndAnd => "&&",
        Tok::OrOr => "||",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_binds_and_tighter_than_or() {
        let e = parse("a || b && c").expect("ok");
        match e.kind {
            ExprKind::Or(_, rhs) => assert!(matches!(rhs.kind, ExprKind::And(_, _))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn negative_literals_fold() {
        assert_eq!(parse("-9223372036854775808").expect("ok").kind, ExprKind::Literal(Literal::Int(i64::MIN)));
        assert!(parse("9223372036854775808").is_err());
    }

    #[test]
    fn has_macro_becomes_presence_test() {
        let e = parse("has(a.b)").expect("ok");
        assert!(matches!(e.kind, ExprKind::Select { test_only: true, .. }));
        assert!(parse("has(a)").is_err());
    }

    #[test]
    fn exists_expands_to_comprehension() {
        let e = parse("[1, 2].exists(x, x > 1)").expect("ok");
        match e.kind {
            ExprKind::Comprehension(c) => {
                assert_eq!(c.iter_var, "x");
                assert_eq!(c.accu_var, ACCU_VAR);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse("[1].all(1, true)").is_err());
    }

    #[test]
    fn trailing_input_is_rejected() {
        let err = parse("a b").unwrap_err();
        assert_eq!(err.column, 3);
    }

    #[test]
    fn logical_chains_are_balanced() {
        let e = parse(&vec!["true"; 1000].join(" && ")).expect("ok");
        assert!(e.height() <= 11, "height {}", e.height());
        let e = parse(&vec!["a"; 7].join(" || ")).expect("ok");
        assert!(matches!(e.kind, ExprKind::Or(_, _)));
        assert_eq!(e.height(), 4);
    }

    #[test]
    fn long_arithmetic_chain_hits_depth_limit() {
        assert!(parse(&vec!["1"; 200].join(" + ")).is_ok());
        let err = parse(&vec!["1"; 600].join(" + ")).expect_err("too deep");
        assert!(err.message.contains("recursion limit"), "{}", err.message);
        assert!(parse(&vec!["x"; 600].join(" == ")).is_err());
        assert!(parse(&format!("a{}", ".b".repeat(600))).is_err());
        assert!(parse(&format!("a{}", "[0]".repeat(600))).is_err());
    }

    #[test]
    fn oversized_expression_is_rejected() {
        let src = format!("'{}'", "x".repeat(MAX_EXPRESSION_SIZE));
        let err = parse(&src).expect_err("too large");
        assert!(err.message.starts_with("expression code point size exceeds limit"), "{}", err.message);
        assert!(parse(&format!("'{}'", "x".repeat(MAX_EXPRESSION_SIZE - 2))).is_ok());
    }
}

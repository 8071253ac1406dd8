//! Static checks: declared references, overload resolution, obvious operand type errors.

use crate::ast::{BinaryOp, Expr, ExprKind, Literal, UnaryOp};
use crate::env::{Env, Type};
use crate::error::Issue;

pub(crate) fn check(env: &Env, src: &str, root: &Expr) -> Vec<Issue> {
    let mut c = Checker { env, src, scopes: Vec::new(), issues: Vec::new() };
    c.visit(root);
    c.issues
}

struct Checker<'a> {
    env: &'a Env,
    src: &'a str,
    scopes: Vec<(String, Type)>,
    issues: Vec<Issue>,
}

impl<'a> Checker<'a> {
    fn report(&mut self, pos: usize, msg: String) { self.issues.push(Issue::at(self.src, pos, msg)); }

    fn no_overload(&mut self, pos: usize, name: &str, receiver: Option<Type>, args: &[Type]) {
        let args = args.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", ");
        let applied = match receiver {
            Some(r) => format!("{}.({})", r, args),
            None => format!("({})", args),
        };
        self.report(pos, format!("found no matching overload for '{}' applied to '{}'", name, applied));
    }

    fn visit(&mut self, e: &Expr) -> Type {
        match &e.kind {
            ExprKind::Literal(l) => match l {
                Literal::Null => Type::Null,
                Literal::Bool(_) => Type::Bool,
                Literal::Int(_) => Type::Int,
                Literal::Uint(_) => Type::Uint,
                Literal::Double(_) => Type::Double,
                Literal::String(_) => Type::String,
            },
            ExprKind::Ident(name) => {
                if let Some((_, t)) = self.scopes.iter().rev().find(|(n, _)| n == name) {
                    return *t;
                }
                match self.env.variable(name) {
                    Some(t) => t,
                    None if Type::named(name).is_some() => Type::Meta,
                    None => {
                        self.report(e.pos, format!("undeclared reference to '{}' (in container '')", name));
                        Type::Dyn
                    }
                }
            }
            ExprKind::Select { operand, field: _, test_only } => {
                let t = self.visit(operand);
                if !matches!(t, Type::Map | Type::Dyn) {
                    self.report(e.pos, format!("type '{}' does not support field selection", t));
                }
                if *test_only { Type::Bool } else { Type::Dyn }
            }
            ExprKind::Index { operand, index } => {
                let t = self.visit(operand);
                let i = self.visit(index);
                let ok = match t {
                    Type::List => Type::Int.accepts(i) || Type::Uint.accepts(i),
                    Type::Map | Type::Dyn => true,
                    _ => false,
                };
                if !ok {
                    self.no_overload(e.pos, "_[_]", None, &[t, i]);
                }
                Type::Dyn
            }
            ExprKind::Call { function, target, args } => {
                let recv = target.as_ref().map(|t| self.visit(t));
                let arg_types: Vec<Type> = args.iter().map(|a| self.visit(a)).collect();
                let Some(f) = self.env.function(function) else {
                    self.report(e.pos, format!("undeclared reference to '{}' (in container '')", function));
                    return Type::Dyn;
                };
                let results: Vec<Type> =
                    f.overloads.iter().filter(|o| o.matches_static(recv, &arg_types)).map(|o| o.result).collect();
                match results.first() {
                    None => {
                        self.no_overload(e.pos, function, recv, &arg_types);
                        Type::Dyn
                    }
                    Some(first) if results.iter().all(|r| r == first) => *first,
                    Some(_) => Type::Dyn,
                }
            }
            ExprKind::Unary(op, operand) => {
                let t = self.visit(operand);
                match op {
                    UnaryOp::Not => {
                        if !Type::Bool.accepts(t) {
                            self.no_overload(e.pos, "!_", None, &[t]);
                        }
                        Type::Bool
                    }
                    UnaryOp::Neg => {
                        if !matches!(t, Type::Int | Type::Double | Type::Dyn) {
                            self.no_overload(e.pos, "-_", None, &[t]);
                        }
                        t
                    }
                }
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let l = self.visit(lhs);
                let r = self.visit(rhs);
                self.binary(e.pos, *op, l, r)
            }
            ExprKind::And(lhs, rhs) | ExprKind::Or(lhs, rhs) => {
                let name = if matches!(e.kind, ExprKind::And(..)) { "_&&_" } else { "_||_" };
                let l = self.visit(lhs);
                let r = self.visit(rhs);
                if !Type::Bool.accepts(l) || !Type::Bool.accepts(r) {
                    self.no_overload(e.pos, name, None, &[l, r]);
                }
                Type::Bool
            }
            ExprKind::Conditional(cond, then, otherwise) => {
                let c = self.visit(cond);
                if !Type::Bool.accepts(c) {
                    self.no_overload(e.pos, "_?_:_", None, &[c]);
                }
                let a = self.visit(then);
                let b = self.visit(otherwise);
                if a == b { a } else { Type::Dyn }
            }
            ExprKind::List(items) => {
                for i in items {
                    self.visit(i);
                }
                Type::List
            }
            ExprKind::Map(entries) => {
                for (k, v) in entries {
                    let kt = self.visit(k);
                    if !matches!(kt, Type::Int | Type::Uint | Type::Bool | Type::String | Type::Dyn) {
                        self.report(k.pos, format!("unsupported map key type: {}", kt));
                    }
                    self.visit(v);
                }
                Type::Map
            }
            ExprKind::Comprehension(c) => {
                let range = self.visit(&c.iter_range);
                if !matches!(range, Type::List | Type::Map | Type::Dyn) {
                    self.report(c.iter_range.pos, format!("expression of type '{}' cannot be range of a comprehension", range));
                }
                let accu = self.visit(&c.accu_init);
                self.scopes.push((c.accu_var.clone(), accu));
                self.scopes.push((c.iter_var.clone(), Type::Dyn));
                self.visit(&c.loop_condition);
                self.visit(&c.loop_step);
                self.scopes.pop();
                let out = self.visit(&c.result);
                self.scopes.pop();
                out
            }
            ExprKind::NotStrictlyFalse(inner) => {
                self.visit(inner);
                Type::Bool
            }
        }
    }

    fn binary(&mut self, pos: usize, op: BinaryOp, l: Type, r: Type) -> Type {
        let name = format!("_{}_", op.symbol());
        let numeric = |t: Type| matches!(t, Type::Int | Type::Uint | Type::Double);
        match op {
            BinaryOp::Eq | BinaryOp::Ne => Type::Bool,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ok = l == Type::Dyn || r == Type::Dyn || (numeric(l) && numeric(r)) || (l == r && matches!(l, Type::String | Type::Bool));
                if !ok {
                    self.no_overload(pos, &name, None, &[l, r]);
                }
                Type::Bool
            }
            BinaryOp::In => {
                if !matches!(r, Type::List | Type::Map | Type::Dyn) {
                    self.no_overload(pos, "@in", None, &[l, r]);
                }
                Type::Bool
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                if l == Type::Dyn || r == Type::Dyn {
                    return if l == Type::Dyn { r.max_known() } else { l.max_known() };
                }
                let ok = l == r
                    && match op {
                        BinaryOp::Add => matches!(l, Type::Int | Type::Uint | Type::Double | Type::String | Type::List),
                        BinaryOp::Rem => matches!(l, Type::Int | Type::Uint),
                        _ => numeric(l),
                    };
                if !ok {
                    self.no_overload(pos, &name, None, &[l, r]);
                    return Type::Dyn;
                }
                l
            }
        }
    }
}

impl Type {
    /// Result type when one side of an arithmetic operator is dynamic.
    fn max_known(self) -> Type {
        match self {
            Type::Int | Type::Uint | Type::Double | Type::String | Type::List => self,
            _ => Type::Dyn,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::env::{Env, Type};

    fn env() -> std::sync::Arc<Env> {
        Env::builder().variable("labels", Type::Map).build().expect("ok")
    }

    #[test]
    fn reports_undeclared_identifiers_and_functions() {
        let e = env();
        let err = e.compile("invalid.expression").unwrap_err();
        assert!(err.to_string().contains("undeclared reference to 'invalid'"), "{}", err);
        let err = e.compile(r#"labels["v"].matchess("x")"#).unwrap_err();
        assert!(err.to_string().contains("undeclared reference to 'matchess'"), "{}", err);
    }

    #[test]
    fn reports_overload_mismatches() {
        let e = env();
        let err = e.compile("1 + 'a'").unwrap_err();
        assert!(err.to_string().contains("found no matching overload for '_+_'"), "{}", err);
        let err = e.compile("size()").unwrap_err();
        assert!(err.to_string().contains("found no matching overload for 'size'"), "{}", err);
        let err = e.compile("(1).startsWith('a')").unwrap_err();
        assert!(err.to_string().contains("found no matching overload for 'startsWith'"), "{}", err);
    }

    #[test]
    fn comprehension_variables_are_scoped() {
        let e = env();
        assert!(e.compile("[1, 2].all(x, x > 0)").is_ok());
        assert!(e.compile("[1, 2].all(x, x > 0) && x == 1").is_err());
    }
}

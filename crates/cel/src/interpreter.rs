//! Tree-walking evaluator with cost tracking and cooperative interruption.

use std::cmp::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::ast::{BinaryOp, Comprehension, Expr, ExprKind, Literal, UnaryOp};
use crate::cost::{self, CostTracker};
use crate::env::{Env, Type};
use crate::error::EvalError;
use crate::program::Activation;
use crate::value::{Key, MapValue, Value};

type EvalResult = Result<Value, EvalError>;

pub(crate) struct Interpreter<'a> {
    env: &'a Env,
    activation: &'a Activation,
    /// Comprehension bindings. Accumulators may hold an error that a later step absorbs.
    locals: Vec<(&'a str, EvalResult)>,
    cost: CostTracker,
    cancel: Option<&'a CancellationToken>,
    check_frequency: u32,
    iterations: u64,
}

fn is_fatal(e: &EvalError) -> bool { matches!(e, EvalError::CostLimitExceeded | EvalError::Interrupted) }

fn overload(name: &str, args: &[&Value]) -> EvalError {
    let types = args.iter().map(|a| a.type_name()).collect::<Vec<_>>().join(", ");
    EvalError::NoSuchOverload(format!("{}({})", name, types))
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(
        env: &'a Env,
        activation: &'a Activation,
        cost_limit: Option<u64>,
        cancel: Option<&'a CancellationToken>,
        check_frequency: u32,
    ) -> Self {
        Self { env, activation, locals: Vec::new(), cost: CostTracker::new(cost_limit), cancel, check_frequency, iterations: 0 }
    }

    pub(crate) fn cost(&self) -> u64 { self.cost.total() }

    pub(crate) fn eval(&mut self, e: &'a Expr) -> EvalResult {
        match &e.kind {
            ExprKind::Literal(l) => Ok(match l {
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Uint(u) => Value::Uint(*u),
                Literal::Double(d) => Value::Double(*d),
                Literal::String(s) => Value::String(Arc::clone(s)),
            }),
            ExprKind::Ident(name) => {
                self.cost.add(cost::SELECT_AND_IDENT_COST)?;
                if let Some((_, v)) = self.locals.iter().rev().find(|(n, _)| *n == name.as_str()) {
                    return v.clone();
                }
                self.activation
                    .get(name)
                    .cloned()
                    .or_else(|| Type::named(name).map(Value::Type))
                    .ok_or_else(|| EvalError::NoSuchAttribute(name.clone()))
            }
            ExprKind::Select { operand, field, test_only } => {
                let v = self.eval(operand)?;
                self.cost.add(cost::SELECT_AND_IDENT_COST)?;
                match v {
                    Value::Map(m) => {
                        let key = Key::from(field.as_str());
                        if *test_only {
                            Ok(Value::Bool(m.contains_key(&key)))
                        } else {
                            m.get(&key).cloned().ok_or_else(|| EvalError::NoSuchKey(field.clone()))
                        }
                    }
                    other => Err(EvalError::NoSuchOverload(format!("field selection '{}' on {}", field, other.type_name()))),
                }
            }
            ExprKind::Index { operand, index } => {
                let v = self.eval(operand)?;
                let i = self.eval(index)?;
                self.cost.add(cost::SELECT_AND_IDENT_COST)?;
                index_value(&v, &i)
            }
            ExprKind::Call { function, target, args } => self.call(function, target.as_deref(), args),
            ExprKind::Unary(op, operand) => {
                let v = self.eval(operand)?;
                self.cost.add(cost::CONST_COST)?;
                match (op, &v) {
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
                    (UnaryOp::Neg, Value::Double(d)) => Ok(Value::Double(-d)),
                    (UnaryOp::Not, _) => Err(overload("!_", &[&v])),
                    (UnaryOp::Neg, _) => Err(overload("-_", &[&v])),
                }
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                self.binary(*op, &l, &r)
            }
            ExprKind::And(lhs, rhs) => self.logical(lhs, rhs, false),
            ExprKind::Or(lhs, rhs) => self.logical(lhs, rhs, true),
            ExprKind::Conditional(cond, then, otherwise) => match self.eval(cond)? {
                Value::Bool(true) => self.eval(then),
                Value::Bool(false) => self.eval(otherwise),
                other => Err(overload("_?_:_", &[&other])),
            },
            ExprKind::List(items) => {
                self.cost.add(cost::LIST_CREATE_BASE_COST)?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                Ok(Value::list(out))
            }
            ExprKind::Map(entries) => {
                self.cost.add(cost::MAP_CREATE_BASE_COST)?;
                let mut out = MapValue::new();
                for (k, v) in entries {
                    let key = self.eval(k)?.to_key()?;
                    let val = self.eval(v)?;
                    if out.insert(key.clone(), val).is_some() {
                        return Err(EvalError::function(format!("Failed with repeated key: {}", key)));
                    }
                }
                Ok(Value::Map(Arc::new(out)))
            }
            ExprKind::Comprehension(c) => self.comprehension(c),
            ExprKind::NotStrictlyFalse(inner) => match self.eval(inner) {
                Ok(Value::Bool(false)) => Ok(Value::Bool(false)),
                Err(e) if is_fatal(&e) => Err(e),
                _ => Ok(Value::Bool(true)),
            },
        }
    }

    /// `&&` / `||` with commutative error absorption: a decisive operand wins over an error.
    fn logical(&mut self, lhs: &'a Expr, rhs: &'a Expr, decisive: bool) -> EvalResult {
        let name = if decisive { "_||_" } else { "_&&_" };
        let l = self.eval(lhs);
        let settled = match &l {
            Ok(Value::Bool(b)) => *b == decisive,
            Err(e) => is_fatal(e),
            _ => false,
        };
        if settled {
            return l;
        }
        let r = self.eval(rhs);
        match (l, r) {
            (_, Ok(Value::Bool(b))) if b == decisive => Ok(Value::Bool(decisive)),
            (_, Err(e)) if is_fatal(&e) => Err(e),
            (Ok(Value::Bool(_)), Ok(Value::Bool(_))) => Ok(Value::Bool(!decisive)),
            (Err(e), _) => Err(e),
            (_, Err(e)) => Err(e),
            (Ok(a), Ok(b)) => Err(overload(name, &[&a, &b])),
        }
    }

    fn tick(&mut self) -> Result<(), EvalError> {
        self.iterations += 1;
        if let Some(token) = self.cancel {
            let freq = u64::from(self.check_frequency);
            if freq > 0 && self.iterations % freq == 0 && token.is_cancelled() {
                return Err(EvalError::Interrupted);
            }
        }
        Ok(())
    }

    fn comprehension(&mut self, c: &'a Comprehension) -> EvalResult {
        let items: Vec<Value> = match self.eval(&c.iter_range)? {
            Value::List(l) => l.iter().cloned().collect(),
            Value::Map(m) => m.keys().map(key_value).collect(),
            other => return Err(overload("comprehension", &[&other])),
        };
        let mut accu = self.eval(&c.accu_init);
        for item in items {
            self.tick()?;
            self.locals.push((c.accu_var.as_str(), accu));
            self.locals.push((c.iter_var.as_str(), Ok(item)));
            let cond = self.eval(&c.loop_condition);
            let next = match cond {
                Ok(Value::Bool(true)) => Some(self.eval(&c.loop_step)),
                Ok(Value::Bool(false)) => None,
                Ok(other) => Some(Err(overload("loop condition", &[&other]))),
                Err(e) => Some(Err(e)),
            };
            self.locals.pop();
            let prev = self.locals.pop().map(|(_, v)| v).unwrap_or(Ok(Value::Null));
            match next {
                Some(Err(e)) if is_fatal(&e) => return Err(e),
                Some(step) => accu = step,
                None => {
                    accu = prev;
                    break;
                }
            }
        }
        self.locals.push((c.accu_var.as_str(), accu));
        let out = self.eval(&c.result);
        self.locals.pop();
        out
    }

    fn call(&mut self, function: &str, target: Option<&'a Expr>, args: &'a [Expr]) -> EvalResult {
        let mut values = Vec::with_capacity(args.len() + 1);
        if let Some(t) = target {
            values.push(self.eval(t)?);
        }
        for a in args {
            values.push(self.eval(a)?);
        }
        let env = self.env;
        let f = env.function(function).ok_or_else(|| EvalError::NoSuchOverload(function.to_string()))?;
        let (receiver, rest) = match target {
            Some(_) => (values.first(), values.get(1..).unwrap_or(&[])),
            None => (None, &values[..]),
        };
        let Some(ov) = f.overloads.iter().find(|o| o.matches_runtime(receiver, rest)) else {
            return Err(overload(function, &values.iter().collect::<Vec<_>>()));
        };
        let result = (ov.imp)(&values);
        let estimated = env.estimators().iter().find_map(|est| est.call_cost(function, &ov.id, &values, result.as_ref().ok()));
        self.cost.add(estimated.unwrap_or_else(|| cost::default_call_cost(&ov.id, &values)))?;
        result
    }

    fn binary(&mut self, op: BinaryOp, l: &Value, r: &Value) -> EvalResult {
        match op {
            BinaryOp::Eq | BinaryOp::Ne => {
                self.cost.add(cost::traversal_cost(l.actual_size().min(r.actual_size())))?;
                let eq = l.equals(r);
                Ok(Value::Bool(if op == BinaryOp::Eq { eq } else { !eq }))
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                self.cost.add(cost::traversal_cost(l.actual_size().min(r.actual_size())).max(cost::CONST_COST))?;
                let ord = l.compare(r)?;
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::Le => ord != Ordering::Greater,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }))
            }
            BinaryOp::In => match r {
                Value::List(items) => {
                    self.cost.add(r.actual_size().max(cost::CONST_COST))?;
                    Ok(Value::Bool(items.iter().any(|i| i.equals(l))))
                }
                Value::Map(m) => {
                    self.cost.add(cost::CONST_COST)?;
                    Ok(Value::Bool(l.to_key().ok().map_or(false, |k| Value::lookup(m, &k).is_some())))
                }
                _ => Err(overload("@in", &[l, r])),
            },
            BinaryOp::Add => match (l, r) {
                (Value::String(a), Value::String(b)) => {
                    self.cost.add(cost::traversal_cost(l.actual_size() + r.actual_size()).max(cost::CONST_COST))?;
                    let mut s = String::with_capacity(a.len() + b.len());
                    s.push_str(a);
                    s.push_str(b);
                    Ok(Value::from(s))
                }
                (Value::List(a), Value::List(b)) => {
                    self.cost.add(cost::CONST_COST)?;
                    let mut out = Vec::with_capacity(a.len() + b.len());
                    out.extend(a.iter().cloned());
                    out.extend(b.iter().cloned());
                    Ok(Value::list(out))
                }
                _ => {
                    self.cost.add(cost::CONST_COST)?;
                    arith(op, l, r)
                }
            },
            _ => {
                self.cost.add(cost::CONST_COST)?;
                arith(op, l, r)
            }
        }
    }
}

fn key_value(k: &Key) -> Value {
    match k {
        Key::Bool(b) => Value::Bool(*b),
        Key::Int(i) => Value::Int(*i),
        Key::Uint(u) => Value::Uint(*u),
        Key::String(s) => Value::String(Arc::clone(s)),
    }
}

fn index_value(v: &Value, i: &Value) -> EvalResult {
    match v {
        Value::List(items) => {
            let idx = match i {
                Value::Int(n) => *n,
                Value::Uint(n) => i64::try_from(*n).map_err(|_| EvalError::Overflow)?,
                Value::Double(d) if d.fract() == 0.0 => *d as i64,
                other => return Err(overload("_[_]", &[v, other])),
            };
            usize::try_from(idx).ok().and_then(|u| items.get(u)).cloned().ok_or(EvalError::IndexOutOfRange(idx))
        }
        Value::Map(m) => {
            let key = i.to_key()?;
            Value::lookup(m, &key).cloned().ok_or_else(|| EvalError::NoSuchKey(key.to_string()))
        }
        other => Err(overload("_[_]", &[other, i])),
    }
}

fn arith(op: BinaryOp, l: &Value, r: &Value) -> EvalResult {
    let name = format!("_{}_", op.symbol());
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let out = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => {
                    if b == 0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    a.checked_div(b)
                }
                BinaryOp::Rem => {
                    if b == 0 {
                        return Err(EvalError::ModulusByZero);
                    }
                    a.checked_rem(b)
                }
                _ => return Err(overload(&name, &[l, r])),
            };
            out.map(Value::Int).ok_or(EvalError::Overflow)
        }
        (Value::Uint(a), Value::Uint(b)) => {
            let (a, b) = (*a, *b);
            let out = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => {
                    if b == 0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    Some(a / b)
                }
                BinaryOp::Rem => {
                    if b == 0 {
                        return Err(EvalError::ModulusByZero);
                    }
                    Some(a % b)
                }
                _ => return Err(overload(&name, &[l, r])),
            };
            out.map(Value::Uint).ok_or(EvalError::Overflow)
        }
        (Value::Double(a), Value::Double(b)) => match op {
            BinaryOp::Add => Ok(Value::Double(a + b)),
            BinaryOp::Sub => Ok(Value::Double(a - b)),
            BinaryOp::Mul => Ok(Value::Double(a * b)),
            BinaryOp::Div => Ok(Value::Double(a / b)),
            _ => Err(overload(&name, &[l, r])),
        },
        _ => Err(overload(&name, &[l, r])),
    }
}

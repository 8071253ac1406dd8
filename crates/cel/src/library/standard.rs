//! Built-in functions: size, type conversions, type introspection, and the core string
//! predicates.

use crate::env::{Function, Library, Overload, Type};
use crate::error::EvalError;
use crate::library::{str_arg, RegexCache};
use crate::value::Value;

pub struct Standard;

fn size(args: &[Value]) -> Result<Value, EvalError> {
    match args.first() {
        Some(v @ (Value::String(_) | Value::List(_) | Value::Map(_))) => Ok(Value::Int(v.actual_size() as i64)),
        Some(other) => Err(EvalError::NoSuchOverload(format!("size({})", other.type_name()))),
        None => Err(EvalError::NoSuchOverload("size".into())),
    }
}

fn to_int(args: &[Value]) -> Result<Value, EvalError> {
    match args.first() {
        Some(Value::Int(i)) => Ok(Value::Int(*i)),
        Some(Value::Uint(u)) => i64::try_from(*u).map(Value::Int).map_err(|_| EvalError::Overflow),
        Some(Value::Double(d)) => {
            if d.is_finite() && *d > i64::MIN as f64 && *d < i64::MAX as f64 {
                Ok(Value::Int(d.trunc() as i64))
            } else {
                Err(EvalError::Overflow)
            }
        }
        Some(Value::String(s)) => s.parse::<i64>().map(Value::Int).map_err(|_| EvalError::function(format!("cannot convert '{}' to int", s))),
        Some(other) => Err(EvalError::NoSuchOverload(format!("int({})", other.type_name()))),
        None => Err(EvalError::NoSuchOverload("int".into())),
    }
}

fn to_uint(args: &[Value]) -> Result<Value, EvalError> {
    match args.first() {
        Some(Value::Uint(u)) => Ok(Value::Uint(*u)),
        Some(Value::Int(i)) => u64::try_from(*i).map(Value::Uint).map_err(|_| EvalError::Overflow),
        Some(Value::Double(d)) => {
            if d.is_finite() && *d >= 0.0 && *d < u64::MAX as f64 {
                Ok(Value::Uint(d.trunc() as u64))
            } else {
                Err(EvalError::Overflow)
            }
        }
        Some(Value::String(s)) => s.parse::<u64>().map(Value::Uint).map_err(|_| EvalError::function(format!("cannot convert '{}' to uint", s))),
        Some(other) => Err(EvalError::NoSuchOverload(format!("uint({})", other.type_name()))),
        None => Err(EvalError::NoSuchOverload("uint".into())),
    }
}

fn to_double(args: &[Value]) -> Result<Value, EvalError> {
    match args.first() {
        Some(Value::Double(d)) => Ok(Value::Double(*d)),
        Some(Value::Int(i)) => Ok(Value::Double(*i as f64)),
        Some(Value::Uint(u)) => Ok(Value::Double(*u as f64)),
        Some(Value::String(s)) => s.parse::<f64>().map(Value::Double).map_err(|_| EvalError::function(format!("cannot convert '{}' to double", s))),
        Some(other) => Err(EvalError::NoSuchOverload(format!("double({})", other.type_name()))),
        None => Err(EvalError::NoSuchOverload("double".into())),
    }
}

fn to_string(args: &[Value]) -> Result<Value, EvalError> {
    match args.first() {
        Some(Value::String(s)) => Ok(Value::String(s.clone())),
        Some(Value::Int(i)) => Ok(Value::from(i.to_string())),
        Some(Value::Uint(u)) => Ok(Value::from(u.to_string())),
        Some(Value::Double(d)) => Ok(Value::from(d.to_string())),
        Some(Value::Bool(b)) => Ok(Value::from(b.to_string())),
        Some(other) => Err(EvalError::NoSuchOverload(format!("string({})", other.type_name()))),
        None => Err(EvalError::NoSuchOverload("string".into())),
    }
}

fn to_bool(args: &[Value]) -> Result<Value, EvalError> {
    match args.first() {
        Some(Value::Bool(b)) => Ok(Value::Bool(*b)),
        Some(Value::String(s)) => match s.as_ref() {
            "1" | "t" | "true" | "TRUE" | "True" => Ok(Value::Bool(true)),
            "0" | "f" | "false" | "FALSE" | "False" => Ok(Value::Bool(false)),
            _ => Err(EvalError::function(format!("cannot convert '{}' to bool", s))),
        },
        Some(other) => Err(EvalError::NoSuchOverload(format!("bool({})", other.type_name()))),
        None => Err(EvalError::NoSuchOverload("bool".into())),
    }
}

fn to_dyn(args: &[Value]) -> Result<Value, EvalError> { args.first().cloned().ok_or_else(|| EvalError::NoSuchOverload("dyn".into())) }

fn type_of(args: &[Value]) -> Result<Value, EvalError> {
    args.first().map(|v| Value::Type(Type::of(v))).ok_or_else(|| EvalError::NoSuchOverload("type".into()))
}

impl Library for Standard {
    fn name(&self) -> &'static str { "standard" }

    fn functions(&self) -> Vec<Function> {
        use Type::*;
        let cache = RegexCache::default();
        let member_cache = cache.clone();
        vec![
            Function::new("size", vec![Overload::global("size", &[Dyn], Int, size), Overload::member("size_member", Dyn, &[], Int, size)]),
            Function::new("int", vec![Overload::global("to_int", &[Dyn], Int, to_int)]),
            Function::new("uint", vec![Overload::global("to_uint", &[Dyn], Uint, to_uint)]),
            Function::new("double", vec![Overload::global("to_double", &[Dyn], Double, to_double)]),
            Function::new("string", vec![Overload::global("to_string", &[Dyn], String, to_string)]),
            Function::new("bool", vec![Overload::global("to_bool", &[Dyn], Bool, to_bool)]),
            Function::new("dyn", vec![Overload::global("to_dyn", &[Dyn], Dyn, to_dyn)]),
            Function::new("type", vec![Overload::global("type", &[Dyn], Meta, type_of)]),
            Function::new(
                "contains",
                vec![Overload::member("contains_string", String, &[String], Bool, |a| {
                    Ok(Value::Bool(str_arg(a, 0, "contains")?.contains(str_arg(a, 1, "contains")?)))
                })],
            ),
            Function::new(
                "startsWith",
                vec![Overload::member("starts_with_string", String, &[String], Bool, |a| {
                    Ok(Value::Bool(str_arg(a, 0, "startsWith")?.starts_with(str_arg(a, 1, "startsWith")?)))
                })],
            ),
            Function::new(
                "endsWith",
                vec![Overload::member("ends_with_string", String, &[String], Bool, |a| {
                    Ok(Value::Bool(str_arg(a, 0, "endsWith")?.ends_with(str_arg(a, 1, "endsWith")?)))
                })],
            ),
            Function::new(
                "matches",
                vec![
                    Overload::member("matches_string", String, &[String], Bool, move |a| {
                        let re = member_cache.get(str_arg(a, 1, "matches")?)?;
                        Ok(Value::Bool(re.is_match(str_arg(a, 0, "matches")?)))
                    }),
                    Overload::global("matches_string_global", &[String, String], Bool, move |a| {
                        let re = cache.get(str_arg(a, 1, "matches")?)?;
                        Ok(Value::Bool(re.is_match(str_arg(a, 0, "matches")?)))
                    }),
                ],
            ),
        ]
    }
}

//! Extended string functions (`lowerAscii`, `split`, `join`, ...).

use std::sync::Arc;

use crate::cost::{traversal_cost, ActualCostEstimator, CONST_COST};
use crate::env::{Function, Library, Overload, Type};
use crate::error::EvalError;
use crate::library::{int_arg, str_arg};
use crate::value::Value;

pub struct Strings;

struct StringsCost;

impl ActualCostEstimator for StringsCost {
    fn call_cost(&self, function: &str, _overload_id: &str, args: &[Value], result: Option<&Value>) -> Option<u64> {
        match function {
            "lowerAscii" | "upperAscii" | "trim" | "replace" | "split" | "substring" | "indexOf" | "lastIndexOf" | "charAt" => {
                let size = args.first().map(Value::actual_size).unwrap_or(0);
                Some(CONST_COST + traversal_cost(size))
            }
            "join" => Some(CONST_COST + traversal_cost(result.map(Value::actual_size).unwrap_or(0))),
            _ => None,
        }
    }
}

fn chars_of(s: &str) -> Vec<char> { s.chars().collect() }

fn char_index(chars: &[char], idx: i64, func: &str) -> Result<usize, EvalError> {
    usize::try_from(idx)
        .ok()
        .filter(|i| *i <= chars.len())
        .ok_or_else(|| EvalError::function(format!("{}: index out of range: {}", func, idx)))
}

fn index_of(a: &[Value], last: bool) -> Result<Value, EvalError> {
    let func = if last { "lastIndexOf" } else { "indexOf" };
    let hay = chars_of(str_arg(a, 0, func)?);
    let needle = chars_of(str_arg(a, 1, func)?);
    let (lo, hi) = match a.get(2) {
        Some(_) if last => (0, char_index(&hay, int_arg(a, 2, func)?, func)?),
        Some(_) => (char_index(&hay, int_arg(a, 2, func)?, func)?, hay.len()),
        None => (0, hay.len()),
    };
    if needle.is_empty() {
        return Ok(Value::Int(if last { hi as i64 } else { lo as i64 }));
    }
    let candidates: Vec<usize> = (lo..hay.len()).filter(|i| i + needle.len() <= hay.len()).collect();
    let hit = |i: &usize| hay[*i..*i + needle.len()] == needle[..];
    let found = if last {
        candidates.into_iter().rev().filter(|i| *i <= hi).find(|i| hit(i))
    } else {
        candidates.into_iter().find(|i| hit(i))
    };
    Ok(Value::Int(found.map(|i| i as i64).unwrap_or(-1)))
}

fn substring(a: &[Value]) -> Result<Value, EvalError> {
    let s = chars_of(str_arg(a, 0, "substring")?);
    let start = char_index(&s, int_arg(a, 1, "substring")?, "substring")?;
    let end = match a.get(2) {
        Some(_) => char_index(&s, int_arg(a, 2, "substring")?, "substring")?,
        None => s.len(),
    };
    if start > end {
        return Err(EvalError::function(format!("substring: invalid range [{}, {})", start, end)));
    }
    Ok(Value::from(s[start..end].iter().collect::<String>()))
}

fn replace(a: &[Value]) -> Result<Value, EvalError> {
    let s = str_arg(a, 0, "replace")?;
    let from = str_arg(a, 1, "replace")?;
    let to = str_arg(a, 2, "replace")?;
    let out = match a.get(3) {
        Some(_) => {
            let n = int_arg(a, 3, "replace")?;
            if n < 0 { s.replace(from, to) } else { s.replacen(from, to, n as usize) }
        }
        None => s.replace(from, to),
    };
    Ok(Value::from(out))
}

fn split(a: &[Value]) -> Result<Value, EvalError> {
    let s = str_arg(a, 0, "split")?;
    let sep = str_arg(a, 1, "split")?;
    let parts: Vec<Value> = match a.get(2) {
        Some(_) => {
            let n = int_arg(a, 2, "split")?;
            match n {
                0 => vec![],
                n if n < 0 => s.split(sep).map(Value::from).collect(),
                n => s.splitn(n as usize, sep).map(Value::from).collect(),
            }
        }
        None => s.split(sep).map(Value::from).collect(),
    };
    Ok(Value::list(parts))
}

fn join(a: &[Value]) -> Result<Value, EvalError> {
    let sep = match a.get(1) {
        Some(_) => str_arg(a, 1, "join")?,
        None => "",
    };
    let Some(Value::List(items)) = a.first() else { return Err(EvalError::NoSuchOverload("join".into())) };
    let parts = items
        .iter()
        .map(|v| v.as_str().map(str::to_string).ok_or_else(|| EvalError::NoSuchOverload("join".into())))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::from(parts.join(sep)))
}

impl Library for Strings {
    fn name(&self) -> &'static str { "strings" }

    fn functions(&self) -> Vec<Function> {
        use Type::*;
        vec![
            Function::new(
                "charAt",
                vec![Overload::member("string_char_at_int", String, &[Int], String, |a| {
                    let s = chars_of(str_arg(a, 0, "charAt")?);
                    let i = char_index(&s, int_arg(a, 1, "charAt")?, "charAt")?;
                    Ok(Value::from(s.get(i).map(|c| c.to_string()).unwrap_or_default()))
                })],
            ),
            Function::new(
                "indexOf",
                vec![
                    Overload::member("string_index_of_string", String, &[String], Int, |a| index_of(a, false)),
                    Overload::member("string_index_of_string_int", String, &[String, Int], Int, |a| index_of(a, false)),
                ],
            ),
            Function::new(
                "lastIndexOf",
                vec![
                    Overload::member("string_last_index_of_string", String, &[String], Int, |a| index_of(a, true)),
                    Overload::member("string_last_index_of_string_int", String, &[String, Int], Int, |a| index_of(a, true)),
                ],
            ),
            Function::new(
                "lowerAscii",
                vec![Overload::member("string_lower_ascii", String, &[], String, |a| {
                    Ok(Value::from(str_arg(a, 0, "lowerAscii")?.to_ascii_lowercase()))
                })],
            ),
            Function::new(
                "upperAscii",
                vec![Overload::member("string_upper_ascii", String, &[], String, |a| {
                    Ok(Value::from(str_arg(a, 0, "upperAscii")?.to_ascii_uppercase()))
                })],
            ),
            Function::new(
                "trim",
                vec![Overload::member("string_trim", String, &[], String, |a| Ok(Value::from(str_arg(a, 0, "trim")?.trim())))],
            ),
            Function::new(
                "replace",
                vec![
                    Overload::member("string_replace_string_string", String, &[String, String], String, replace),
                    Overload::member("string_replace_string_string_int", String, &[String, String, Int], String, replace),
                ],
            ),
            Function::new(
                "split",
                vec![
                    Overload::member("string_split_string", String, &[String], List, split),
                    Overload::member("string_split_string_int", String, &[String, Int], List, split),
                ],
            ),
            Function::new(
                "substring",
                vec![
                    Overload::member("string_substring_int", String, &[Int], String, substring),
                    Overload::member("string_substring_int_int", String, &[Int, Int], String, substring),
                ],
            ),
            Function::new(
                "join",
                vec![
                    Overload::member("list_join", List, &[], String, join),
                    Overload::member("list_join_string", List, &[String], String, join),
                ],
            ),
        ]
    }

    fn cost_estimator(&self) -> Option<Arc<dyn ActualCostEstimator>> { Some(Arc::new(StringsCost)) }
}

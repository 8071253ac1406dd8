//! `find` / `findAll` over RE2-compatible patterns.

use std::sync::Arc;

use crate::cost::{scaled, ActualCostEstimator, REGEX_STRING_LENGTH_COST_FACTOR, STRING_TRAVERSAL_COST_FACTOR};
use crate::env::{Function, Library, Overload, Type};
use crate::error::EvalError;
use crate::library::{int_arg, str_arg, RegexCache};
use crate::value::Value;

pub struct Regex;

struct RegexCost;

impl ActualCostEstimator for RegexCost {
    fn call_cost(&self, function: &str, _overload_id: &str, args: &[Value], result: Option<&Value>) -> Option<u64> {
        match function {
            "find" | "findAll" => {
                let s = args.first().map(Value::actual_size).unwrap_or(0);
                let re = args.get(1).map(Value::actual_size).unwrap_or(0);
                let scan = scaled(1 + s, STRING_TRAVERSAL_COST_FACTOR) * scaled(re, REGEX_STRING_LENGTH_COST_FACTOR).max(1);
                let out = result.map(|r| if function == "findAll" { r.actual_size() } else { 0 }).unwrap_or(0);
                Some(scan + out)
            }
            _ => None,
        }
    }
}

impl Library for Regex {
    fn name(&self) -> &'static str { "regex" }

    fn functions(&self) -> Vec<Function> {
        use Type::*;
        let find_cache = RegexCache::default();
        let all_cache = find_cache.clone();
        vec![
            Function::new(
                "find",
                vec![Overload::member("string_find_string", String, &[String], String, move |a| {
                    let re = find_cache.get(str_arg(a, 1, "find")?)?;
                    Ok(Value::from(re.find(str_arg(a, 0, "find")?).map(|m| m.as_str()).unwrap_or("")))
                })],
            ),
            Function::new(
                "findAll",
                vec![
                    Overload::member("string_find_all_string", String, &[String], List, {
                        let cache = all_cache.clone();
                        move |a: &[Value]| find_all(&cache, a)
                    }),
                    Overload::member("string_find_all_string_int", String, &[String, Int], List, move |a| find_all(&all_cache, a)),
                ],
            ),
        ]
    }

    fn cost_estimator(&self) -> Option<Arc<dyn ActualCostEstimator>> { Some(Arc::new(RegexCost)) }
}

fn find_all(cache: &RegexCache, a: &[Value]) -> Result<Value, EvalError> {
    let re = cache.get(str_arg(a, 1, "findAll")?)?;
    let s = str_arg(a, 0, "findAll")?;
    let limit = match a.get(2) {
        Some(_) => int_arg(a, 2, "findAll")?,
        None => -1,
    };
    if limit == 0 {
        return Ok(Value::list(vec![]));
    }
    let matches = re.find_iter(s).map(|m| Value::from(m.as_str()));
    let out: Vec<Value> = if limit < 0 { matches.collect() } else { matches.take(limit as usize).collect() };
    Ok(Value::list(out))
}

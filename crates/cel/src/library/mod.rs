//! Function libraries. [`standard::Standard`] is always installed; the rest are opt-in.

pub mod json;
pub mod regex;
pub mod standard;
pub mod strings;

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use crate::error::EvalError;
use crate::value::Value;

const REGEX_CACHE_CAP: usize = 128;

/// Compiled-pattern cache shared by the closures of one library instance.
#[derive(Debug, Default, Clone)]
pub(crate) struct RegexCache {
    inner: Arc<Mutex<FxHashMap<String, Arc<::regex::Regex>>>>,
}

impl RegexCache {
    pub(crate) fn get(&self, pattern: &str) -> Result<Arc<::regex::Regex>, EvalError> {
        if let Ok(guard) = self.inner.lock() {
            if let Some(re) = guard.get(pattern) {
                return Ok(Arc::clone(re));
            }
        }
        let re = Arc::new(
            ::regex::Regex::new(pattern).map_err(|e| EvalError::function(format!("invalid regular expression '{}': {}", pattern, e)))?,
        );
        if let Ok(mut guard) = self.inner.lock() {
            if guard.len() >= REGEX_CACHE_CAP {
                guard.clear();
            }
            guard.insert(pattern.to_string(), Arc::clone(&re));
        }
        Ok(re)
    }
}

pub(crate) fn str_arg<'v>(args: &'v [Value], i: usize, func: &str) -> Result<&'v str, EvalError> {
    args.get(i).and_then(Value::as_str).ok_or_else(|| EvalError::NoSuchOverload(func.to_string()))
}

pub(crate) fn int_arg(args: &[Value], i: usize, func: &str) -> Result<i64, EvalError> {
    match args.get(i) {
        Some(Value::Int(n)) => Ok(*n),
        _ => Err(EvalError::NoSuchOverload(func.to_string())),
    }
}

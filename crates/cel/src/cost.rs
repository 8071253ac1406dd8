//! Runtime cost accounting.
//!
//! Every identifier, field selection, index and function call costs one unit; literals are free.
//! Container literals cost their creation base. Functions that traverse strings or
//! containers are charged proportionally to the traversed size.

use crate::error::EvalError;
use crate::value::Value;

pub const SELECT_AND_IDENT_COST: u64 = 1;
pub const CONST_COST: u64 = 1;
pub const LIST_CREATE_BASE_COST: u64 = 10;
pub const MAP_CREATE_BASE_COST: u64 = 30;
pub const STRING_TRAVERSAL_COST_FACTOR: f64 = 0.1;
pub const REGEX_STRING_LENGTH_COST_FACTOR: f64 = 0.25;

/// Per-call cost override supplied by a library. Returning `None` defers to the next
/// estimator and finally to the built-in model.
pub trait ActualCostEstimator: Send + Sync {
    fn call_cost(&self, function: &str, overload_id: &str, args: &[Value], result: Option<&Value>) -> Option<u64>;
}

/// `ceil(size * factor)`.
pub fn scaled(size: u64, factor: f64) -> u64 { (size as f64 * factor).ceil() as u64 }

pub fn traversal_cost(size: u64) -> u64 { scaled(size, STRING_TRAVERSAL_COST_FACTOR) }

/// Creation cost of a data structure: map base per map, list base per list, recursively.
pub fn struct_cost(v: &Value) -> u64 {
    match v {
        Value::Map(m) => MAP_CREATE_BASE_COST + m.values().map(struct_cost).sum::<u64>(),
        Value::List(l) => LIST_CREATE_BASE_COST + l.iter().map(struct_cost).sum::<u64>(),
        _ => 0,
    }
}

/// Running total for one evaluation with an optional hard ceiling.
#[derive(Debug, Clone)]
pub(crate) struct CostTracker {
    cost: u64,
    limit: Option<u64>,
}

impl CostTracker {
    pub(crate) fn new(limit: Option<u64>) -> Self { Self { cost: 0, limit } }

    pub(crate) fn add(&mut self, units: u64) -> Result<(), EvalError> {
        self.cost = self.cost.saturating_add(units);
        match self.limit {
            Some(limit) if self.cost > limit => Err(EvalError::CostLimitExceeded),
            _ => Ok(()),
        }
    }

    pub(crate) fn total(&self) -> u64 { self.cost }
}

/// Built-in model for calls no library estimator claims.
pub(crate) fn default_call_cost(overload_id: &str, args: &[Value]) -> u64 {
    let size = |i: usize| args.get(i).map(Value::actual_size).unwrap_or(0);
    match overload_id {
        "starts_with_string" | "ends_with_string" => traversal_cost(size(1)).max(CONST_COST),
        "contains_string" => scaled(1 + size(0), STRING_TRAVERSAL_COST_FACTOR) * traversal_cost(size(1)).max(1),
        "matches_string" | "matches_string_global" => {
            scaled(1 + size(0), STRING_TRAVERSAL_COST_FACTOR) * scaled(size(1), REGEX_STRING_LENGTH_COST_FACTOR).max(1)
        }
        _ => CONST_COST,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_enforces_limit() {
        let mut t = CostTracker::new(Some(3));
        assert!(t.add(3).is_ok());
        assert_eq!(t.add(1), Err(EvalError::CostLimitExceeded));
        assert_eq!(t.total(), 4);
    }

    #[test]
    fn struct_cost_counts_nested_containers() {
        let v = Value::from(serde_json::json!({"a": [1, {"b": 2}], "c": "x"}));
        assert_eq!(struct_cost(&v), MAP_CREATE_BASE_COST * 2 + LIST_CREATE_BASE_COST);
        assert_eq!(struct_cost(&Value::Int(1)), 0);
    }

    #[test]
    fn traversal_rounds_up() {
        assert_eq!(traversal_cost(0), 0);
        assert_eq!(traversal_cost(4), 1);
        assert_eq!(traversal_cost(11), 2);
    }
}

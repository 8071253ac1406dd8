//! `parseJSON`: decode a JSON document embedded in a string (labels, annotations, claims).

use std::sync::Arc;

use crate::cost::{struct_cost, traversal_cost, ActualCostEstimator, MAP_CREATE_BASE_COST};
use crate::env::{Function, Library, Overload, Type};
use crate::error::EvalError;
use crate::library::str_arg;
use crate::value::Value;

pub struct Json;

struct JsonCost;

impl ActualCostEstimator for JsonCost {
    fn call_cost(&self, function: &str, _overload_id: &str, args: &[Value], result: Option<&Value>) -> Option<u64> {
        if function != "parseJSON" {
            return None;
        }
        match args.first() {
            Some(input) => Some(traversal_cost(input.actual_size()) + result.map(struct_cost).unwrap_or(0)),
            None => Some(MAP_CREATE_BASE_COST),
        }
    }
}

fn parse_json(a: &[Value]) -> Result<Value, EvalError> {
    let s = str_arg(a, 0, "parseJSON")?;
    let v: serde_json::Value = serde_json::from_str(s).map_err(|e| EvalError::function(format!("failed to parse JSON: {}", e)))?;
    Ok(Value::from(&v))
}

impl Library for Json {
    fn name(&self) -> &'static str { "json" }

    fn functions(&self) -> Vec<Function> {
        vec![Function::new(
            "parseJSON",
            vec![
                Overload::global("parse_json_string", &[Type::String], Type::Dyn, parse_json),
                Overload::member("string_parse_json", Type::String, &[], Type::Dyn, parse_json),
            ],
        )]
    }

    fn cost_estimator(&self) -> Option<Arc<dyn ActualCostEstimator>> { Some(Arc::new(JsonCost)) }
}

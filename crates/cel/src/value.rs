//! Runtime values and their JSON bridge.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::env::Type;
use crate::error::EvalError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Bool(bool),
    Int(i64),
    Uint(u64),
    String(Arc<str>),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Bool(b) => write!(f, "{}", b),
            Key::Int(i) => write!(f, "{}", i),
            Key::Uint(u) => write!(f, "{}", u),
            Key::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self { Key::String(Arc::from(s)) }
}

impl From<String> for Key {
    fn from(s: String) -> Self { Key::String(Arc::from(s)) }
}

pub type MapValue = BTreeMap<Key, Value>;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(Arc<str>),
    List(Arc<Vec<Value>>),
    Map(Arc<MapValue>),
    Type(Type),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self { Value::String(Arc::from(s.as_ref())) }

    pub fn list(items: Vec<Value>) -> Self { Value::List(Arc::new(items)) }

    pub fn map<K: Into<Key>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(Arc::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null_type",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Type(_) => "type",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Size as used by cost accounting: length for strings and containers, 1 otherwise.
    pub fn actual_size(&self) -> u64 {
        match self {
            Value::String(s) => s.chars().count() as u64,
            Value::List(l) => l.len() as u64,
            Value::Map(m) => m.len() as u64,
            _ => 1,
        }
    }

    pub fn to_key(&self) -> Result<Key, EvalError> {
        match self {
            Value::Bool(b) => Ok(Key::Bool(*b)),
            Value::Int(i) => Ok(Key::Int(*i)),
            Value::Uint(u) => Ok(Key::Uint(*u)),
            Value::String(s) => Ok(Key::String(s.clone())),
            other => Err(EvalError::function(format!("unsupported key type: {}", other.type_name()))),
        }
    }

    /// Map lookup with numeric keys compared by value across int and uint.
    pub fn lookup<'a>(map: &'a MapValue, key: &Key) -> Option<&'a Value> {
        if let Some(v) = map.get(key) {
            return Some(v);
        }
        match key {
            Key::Int(i) if *i >= 0 => map.get(&Key::Uint(*i as u64)),
            Key::Uint(u) => i64::try_from(*u).ok().and_then(|i| map.get(&Key::Int(i))),
            _ => None,
        }
    }

    /// Heterogeneous CEL equality: numbers compare by value, other mismatched types are unequal.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y)),
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| Value::lookup(b, k).map_or(false, |w| v.equals(w)))
            }
            (a, b) => matches!(a.compare_numeric(b), Some(Ordering::Equal)),
        }
    }

    fn compare_numeric(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Uint(a), Value::Uint(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Uint(b)) => Some(if *a < 0 { Ordering::Less } else { (*a as u64).cmp(b) }),
            (Value::Uint(a), Value::Int(b)) => Some(if *b < 0 { Ordering::Greater } else { a.cmp(&(*b as u64)) }),
            (Value::Int(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
            (Value::Double(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Uint(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
            (Value::Double(a), Value::Uint(b)) => a.partial_cmp(&(*b as f64)),
            _ => None,
        }
    }

    /// Ordering for `< <= > >=`; errors on incomparable operands.
    pub fn compare(&self, other: &Value) -> Result<Ordering, EvalError> {
        let ord = match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (a, b) => a.compare_numeric(b),
        };
        ord.ok_or_else(|| EvalError::NoSuchOverload(format!("compare({}, {})", self.type_name(), other.type_name())))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool { self.equals(other) }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self { Value::Int(i) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::string(s) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::String(Arc::from(s)) }
}

impl From<&serde_json::Value> for Value {
    fn from(v: &serde_json::Value) -> Self {
        use serde_json::Value as J;
        match v {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(*b),
            J::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            J::String(s) => Value::string(s),
            J::Array(items) => Value::list(items.iter().map(Value::from).collect()),
            J::Object(obj) => Value::Map(Arc::new(obj.iter().map(|(k, v)| (Key::from(k.as_str()), Value::from(v))).collect())),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self { Value::from(&v) }
}

impl Value {
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Uint(u) => J::from(*u),
            Value::Double(d) => serde_json::Number::from_f64(*d).map(J::Number).unwrap_or(J::Null),
            Value::String(s) => J::String(s.to_string()),
            Value::List(l) => J::Array(l.iter().map(Value::to_json).collect()),
            Value::Map(m) => J::Object(m.iter().map(|(k, v)| (k.to_string(), v.to_json())).collect()),
            Value::Type(t) => J::String(t.name().to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Uint(u) => write!(f, "{}u", u),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{:?}", s),
            Value::List(_) | Value::Map(_) => write!(f, "{}", self.to_json()),
            Value::Type(t) => f.write_str(t.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_equality_crosses_types() {
        assert!(Value::Int(1).equals(&Value::Uint(1)));
        assert!(Value::Int(2).equals(&Value::Double(2.0)));
        assert!(!Value::Int(-1).equals(&Value::Uint(1)));
        assert!(!Value::string("1").equals(&Value::Int(1)));
    }

    #[test]
    fn json_bridge_preserves_shape() {
        let j = serde_json::json!({"a": [1, "x", true, null], "b": {"c": 2.5}});
        let v = Value::from(&j);
        assert_eq!(v.to_json(), j);
        match &v {
            Value::Map(m) => assert_eq!(m.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn lookup_accepts_uint_for_int_keys() {
        let m: MapValue = [(Key::Int(1), Value::from("one"))].into_iter().collect();
        assert_eq!(Value::lookup(&m, &Key::Uint(1)), Some(&Value::from("one")));
        assert_eq!(Value::lookup(&m, &Key::Int(2)), None);
    }
}

//! Value model for cached records.
//!
//! A [`Value`] is the tagged union every repository operation speaks. The
//! stored form of a value is always a string (or a map of field name to
//! string); the codec in `ember-store` performs that translation. Decoding
//! yields either a concretely-typed value (when a [`TypeHint`] is supplied)
//! or the representation's natural scalar form — never an untyped blob that
//! is silently used as both.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// A structured cache value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(Timestamp),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Convert a JSON value into its natural [`Value`] form.
    ///
    /// JSON has no timestamp type, so timestamps arrive as [`Value::Text`]
    /// here; reconstruction into [`Value::Timestamp`] is hint-driven and
    /// happens in the codec.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert into the natural JSON form.
    ///
    /// Booleans become JSON booleans and timestamps become RFC 3339 strings,
    /// which is what serde-derived records expect when rebuilt.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => {
                serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(ts) => serde_json::Value::String(
                ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            ),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Timestamp> for Value {
    fn from(ts: Timestamp) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

/// The value stored at a key: a flat scalar (string-set semantics) or a
/// field map (hash semantics).
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Scalar(Value),
    Fields(BTreeMap<String, Value>),
}

impl Record {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Record::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_fields(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Record::Fields(fields) => Some(fields),
            _ => None,
        }
    }
}

/// Expected type of a stored representation, supplied by the caller when the
/// stored form is not self-describing (booleans, timestamps, typed records).
#[derive(Debug, Clone, PartialEq)]
pub enum TypeHint {
    Bool,
    Int,
    Float,
    Text,
    Timestamp,
    List,
    Map,
    /// A structured record with per-field hints; supports nesting one level
    /// per hint layer.
    Record(FieldHints),
}

impl TypeHint {
    /// Name used in `SerializationError::HintMismatch`.
    pub fn expected_name(&self) -> &'static str {
        match self {
            TypeHint::Bool => "bool",
            TypeHint::Int => "integer",
            TypeHint::Float => "float",
            TypeHint::Text => "text",
            TypeHint::Timestamp => "timestamp",
            TypeHint::List => "list",
            TypeHint::Map => "map",
            TypeHint::Record(_) => "record",
        }
    }
}

/// Per-field type hints for hash-shaped records.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldHints {
    hints: BTreeMap<String, TypeHint>,
}

impl FieldHints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    pub fn with(mut self, field: impl Into<String>, hint: TypeHint) -> Self {
        self.hints.insert(field.into(), hint);
        self
    }

    pub fn get(&self, field: &str) -> Option<&TypeHint> {
        self.hints.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }
}

/// Marker trait for structs that round-trip through a hash-shaped record.
///
/// `field_hints` must name every field whose stored representation is not
/// self-describing: booleans, timestamps, and nested records. Fields holding
/// plain integers, floats, strings, lists, or maps need no hint.
pub trait CacheRecord: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn field_hints() -> FieldHints {
        FieldHints::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_natural_forms() {
        assert_eq!(Value::from_json(serde_json::json!(null)), Value::Null);
        assert_eq!(Value::from_json(serde_json::json!(true)), Value::Bool(true));
        assert_eq!(Value::from_json(serde_json::json!(7)), Value::Int(7));
        assert_eq!(Value::from_json(serde_json::json!(1.5)), Value::Float(1.5));
        assert_eq!(
            Value::from_json(serde_json::json!("hello")),
            Value::Text("hello".to_string())
        );
    }

    #[test]
    fn test_json_roundtrip_structured() {
        let value = Value::Map(BTreeMap::from([
            ("count".to_string(), Value::Int(3)),
            (
                "names".to_string(),
                Value::List(vec![Value::Text("a".to_string()), Value::Text("b".to_string())]),
            ),
        ]));
        assert_eq!(Value::from_json(value.to_json()), value);
    }

    #[test]
    fn test_timestamp_to_json_is_rfc3339() {
        let ts = chrono::DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
        let json = Value::Timestamp(ts).to_json();
        let s = json.as_str().expect("timestamp serializes to a string");
        assert!(s.starts_with("2023-11-14T"));
        assert!(s.ends_with('Z'));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::Int(4).as_i64(), Some(4));
        assert_eq!(Value::Int(4).as_f64(), Some(4.0));
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Text("x".to_string()).as_str(), Some("x"));
        assert!(Value::Null.is_null());
        assert_eq!(Value::Text("x".to_string()).as_i64(), None);
    }

    #[test]
    fn test_field_hints_builder() {
        let hints = FieldHints::new()
            .with("active", TypeHint::Bool)
            .with("seen_at", TypeHint::Timestamp);
        assert_eq!(hints.get("active"), Some(&TypeHint::Bool));
        assert_eq!(hints.get("seen_at"), Some(&TypeHint::Timestamp));
        assert_eq!(hints.get("missing"), None);
    }

    #[test]
    fn test_record_accessors() {
        let scalar = Record::Scalar(Value::Int(1));
        assert!(scalar.as_scalar().is_some());
        assert!(scalar.as_fields().is_none());

        let fields = Record::Fields(BTreeMap::from([("a".to_string(), Value::Int(1))]));
        assert!(fields.as_fields().is_some());
        assert!(fields.as_scalar().is_none());
    }
}

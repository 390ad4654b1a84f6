//! Type-preserving codec between [`Value`]s and store-native representations.
//!
//! The stored form of every value is a string. Scalars encode to compact
//! text — booleans as a single-character `"1"`/`"0"` flag, timestamps as
//! RFC 3339 UTC with fixed microsecond precision (lexicographically
//! sortable) — and structured values encode to JSON whose nested booleans
//! and timestamps are recursively encoded the same way.
//!
//! Decoding is hint-driven: with a [`TypeHint`] the original typed value is
//! reconstructed or a [`SerializationError`] names the field and expected
//! type; without a hint the representation's natural scalar form is
//! returned. There is no silent coercion in either direction.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};

use ember_core::{CacheRecord, FieldHints, SerializationError, TypeHint, Value};

/// Field name used in errors for top-level (non-hash) decodes.
const TOP_LEVEL: &str = "<value>";

/// Encode a value to its store-native string representation.
pub fn encode(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Micros, true),
        Value::List(_) | Value::Map(_) => encoded_json(value).to_string(),
    }
}

/// Encode a single list element as a JSON fragment, for atomic list pushes.
pub fn encode_element(value: &Value) -> String {
    encoded_json(value).to_string()
}

/// Decode a store representation, optionally reconstructing a hinted type.
pub fn decode(repr: &str, hint: Option<&TypeHint>) -> Result<Value, SerializationError> {
    decode_field(TOP_LEVEL, repr, hint)
}

/// Decode a named field's representation. The field name only feeds error
/// messages.
pub fn decode_field(
    field: &str,
    repr: &str,
    hint: Option<&TypeHint>,
) -> Result<Value, SerializationError> {
    let Some(hint) = hint else {
        return Ok(natural(repr));
    };
    match hint {
        TypeHint::Text => Ok(Value::Text(repr.to_string())),
        TypeHint::Bool => match repr {
            "1" => Ok(Value::Bool(true)),
            "0" => Ok(Value::Bool(false)),
            _ => Err(mismatch(field, "bool", repr)),
        },
        TypeHint::Int => repr
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| mismatch(field, "integer", repr)),
        TypeHint::Float => repr
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| mismatch(field, "float", repr)),
        TypeHint::Timestamp => parse_timestamp(repr)
            .map(Value::Timestamp)
            .ok_or_else(|| mismatch(field, "timestamp", repr)),
        TypeHint::List | TypeHint::Map | TypeHint::Record(_) => {
            let json: serde_json::Value = serde_json::from_str(repr)
                .map_err(|_| mismatch(field, hint.expected_name(), repr))?;
            revive(field, json, Some(hint))
        }
    }
}

/// Encode a field map for hash storage.
pub fn encode_fields(fields: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), encode(value)))
        .collect()
}

/// Decode a raw hash, applying per-field hints where supplied.
pub fn decode_fields(
    raw: &BTreeMap<String, String>,
    hints: &FieldHints,
) -> Result<BTreeMap<String, Value>, SerializationError> {
    raw.iter()
        .map(|(name, repr)| {
            decode_field(name, repr, hints.get(name)).map(|value| (name.clone(), value))
        })
        .collect()
}

/// Encode a typed record into hash fields.
pub fn encode_record<T: CacheRecord>(record: &T) -> Result<BTreeMap<String, String>, SerializationError> {
    let json = serde_json::to_value(record).map_err(|e| SerializationError::UnsupportedShape {
        reason: e.to_string(),
    })?;
    let serde_json::Value::Object(map) = json else {
        return Err(SerializationError::UnsupportedShape {
            reason: "record must serialize to an object".to_string(),
        });
    };
    Ok(map
        .into_iter()
        .map(|(name, value)| {
            let encoded = encode(&Value::from_json(value));
            (name, encoded)
        })
        .collect())
}

/// Rebuild a typed record from hash fields using its declared hints.
pub fn decode_record<T: CacheRecord>(raw: &BTreeMap<String, String>) -> Result<T, SerializationError> {
    let fields = decode_fields(raw, &T::field_hints())?;
    let json = Value::Map(fields).to_json();
    serde_json::from_value(json).map_err(|e| SerializationError::Record {
        type_name: std::any::type_name::<T>(),
        reason: e.to_string(),
    })
}

/// Parse the fixed sortable timestamp format (any RFC 3339 offset accepted,
/// normalized to UTC).
pub fn parse_timestamp(repr: &str) -> Option<ember_core::Timestamp> {
    chrono::DateTime::parse_from_rfc3339(repr)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The representation's natural scalar form: JSON-parsable text becomes the
/// parsed structure, everything else is plain text.
fn natural(repr: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(repr) {
        Ok(json) => Value::from_json(json),
        Err(_) => Value::Text(repr.to_string()),
    }
}

/// Storage JSON form: nested booleans become `"1"`/`"0"` strings and nested
/// timestamps RFC 3339 strings.
fn encoded_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::String(if *b { "1" } else { "0" }.to_string()),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map_or_else(|| serde_json::Value::String(f.to_string()), serde_json::Value::Number),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Timestamp(ts) => {
            serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
        }
        Value::List(items) => serde_json::Value::Array(items.iter().map(encoded_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (k.clone(), encoded_json(v))).collect(),
        ),
    }
}

/// Revive a JSON value found inside a structured representation.
fn revive(
    field: &str,
    json: serde_json::Value,
    hint: Option<&TypeHint>,
) -> Result<Value, SerializationError> {
    let Some(hint) = hint else {
        return Ok(Value::from_json(json));
    };
    match hint {
        TypeHint::Bool => match &json {
            serde_json::Value::String(s) if s == "1" => Ok(Value::Bool(true)),
            serde_json::Value::String(s) if s == "0" => Ok(Value::Bool(false)),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            other => Err(mismatch(field, "bool", &other.to_string())),
        },
        TypeHint::Int => json
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| mismatch(field, "integer", &json.to_string())),
        TypeHint::Float => json
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| mismatch(field, "float", &json.to_string())),
        TypeHint::Text => match json {
            serde_json::Value::String(s) => Ok(Value::Text(s)),
            other => Err(mismatch(field, "text", &other.to_string())),
        },
        TypeHint::Timestamp => match &json {
            serde_json::Value::String(s) => parse_timestamp(s)
                .map(Value::Timestamp)
                .ok_or_else(|| mismatch(field, "timestamp", s)),
            other => Err(mismatch(field, "timestamp", &other.to_string())),
        },
        TypeHint::List => match json {
            serde_json::Value::Array(items) => {
                Ok(Value::List(items.into_iter().map(Value::from_json).collect()))
            }
            other => Err(mismatch(field, "list", &other.to_string())),
        },
        TypeHint::Map => match json {
            serde_json::Value::Object(map) => Ok(Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            )),
            other => Err(mismatch(field, "map", &other.to_string())),
        },
        TypeHint::Record(hints) => match json {
            serde_json::Value::Object(map) => {
                let mut fields = BTreeMap::new();
                for (name, value) in map {
                    let path = format!("{field}.{name}");
                    let revived = revive(&path, value, hints.get(&name))?;
                    fields.insert(name, revived);
                }
                Ok(Value::Map(fields))
            }
            other => Err(mismatch(field, "record", &other.to_string())),
        },
    }
}

fn mismatch(field: &str, expected: &'static str, repr: &str) -> SerializationError {
    SerializationError::HintMismatch {
        field: field.to_string(),
        expected,
        repr: repr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[test]
    fn test_scalar_encodings() {
        assert_eq!(encode(&Value::Null), "null");
        assert_eq!(encode(&Value::Bool(true)), "1");
        assert_eq!(encode(&Value::Bool(false)), "0");
        assert_eq!(encode(&Value::Int(42)), "42");
        assert_eq!(encode(&Value::Float(1.5)), "1.5");
        assert_eq!(encode(&Value::Text("plain".to_string())), "plain");
    }

    #[test]
    fn test_timestamp_encoding_is_sortable() {
        let early = chrono::DateTime::from_timestamp(1_700_000_000, 0).expect("valid");
        let late = chrono::DateTime::from_timestamp(1_700_000_001, 0).expect("valid");
        let a = encode(&Value::Timestamp(early));
        let b = encode(&Value::Timestamp(late));
        assert!(a < b, "encoded timestamps must sort chronologically");
        assert_eq!(a.len(), b.len(), "fixed-width representation");
    }

    #[test]
    fn test_hinted_scalar_roundtrips() {
        let ts = chrono::DateTime::from_timestamp(1_700_000_000, 123_456_000).expect("valid");
        let cases = [
            (Value::Bool(true), TypeHint::Bool),
            (Value::Bool(false), TypeHint::Bool),
            (Value::Int(-7), TypeHint::Int),
            (Value::Float(2.25), TypeHint::Float),
            (Value::Text("123".to_string()), TypeHint::Text),
            (Value::Timestamp(ts), TypeHint::Timestamp),
        ];
        for (value, hint) in cases {
            let repr = encode(&value);
            let decoded = decode(&repr, Some(&hint)).expect("decodes with matching hint");
            assert_eq!(decoded, value, "roundtrip for {repr}");
        }
    }

    #[test]
    fn test_unhinted_natural_forms() {
        assert_eq!(decode("null", None).expect("ok"), Value::Null);
        assert_eq!(decode("42", None).expect("ok"), Value::Int(42));
        assert_eq!(decode("1.5", None).expect("ok"), Value::Float(1.5));
        assert_eq!(
            decode("plain text", None).expect("ok"),
            Value::Text("plain text".to_string())
        );
        // No greedy bool coercion: an unhinted flag is just an integer.
        assert_eq!(decode("1", None).expect("ok"), Value::Int(1));
    }

    #[test]
    fn test_hint_mismatch_names_field_and_type() {
        let err = decode_field("active", "yes", Some(&TypeHint::Bool)).expect_err("must fail");
        match err {
            SerializationError::HintMismatch { field, expected, repr } => {
                assert_eq!(field, "active");
                assert_eq!(expected, "bool");
                assert_eq!(repr, "yes");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_int_hint_rejects_float_repr() {
        assert!(decode("1.5", Some(&TypeHint::Int)).is_err());
        assert!(decode("abc", Some(&TypeHint::Int)).is_err());
    }

    #[test]
    fn test_structured_map_roundtrip() {
        let map = Value::Map(BTreeMap::from([
            ("count".to_string(), Value::Int(3)),
            ("label".to_string(), Value::Text("a:b".to_string())),
            (
                "tags".to_string(),
                Value::List(vec![Value::Text("x".to_string()), Value::Int(2)]),
            ),
        ]));
        let repr = encode(&map);
        let decoded = decode(&repr, Some(&TypeHint::Map)).expect("decodes");
        assert_eq!(decoded, map);
    }

    #[test]
    fn test_nested_bools_need_record_hint() {
        let map = Value::Map(BTreeMap::from([("active".to_string(), Value::Bool(true))]));
        let repr = encode(&map);
        assert_eq!(repr, r#"{"active":"1"}"#);

        // A plain Map hint leaves the flag in its stored text form.
        let plain = decode(&repr, Some(&TypeHint::Map)).expect("decodes");
        assert_eq!(
            plain,
            Value::Map(BTreeMap::from([(
                "active".to_string(),
                Value::Text("1".to_string())
            )]))
        );

        // A Record hint reconstructs the boolean.
        let hint = TypeHint::Record(FieldHints::new().with("active", TypeHint::Bool));
        let typed = decode(&repr, Some(&hint)).expect("decodes");
        assert_eq!(typed, map);
    }

    #[test]
    fn test_decode_fields_applies_per_field_hints() {
        let raw = BTreeMap::from([
            ("step".to_string(), "3".to_string()),
            ("active".to_string(), "1".to_string()),
        ]);
        let hints = FieldHints::new().with("active", TypeHint::Bool);
        let fields = decode_fields(&raw, &hints).expect("decodes");
        assert_eq!(fields.get("step"), Some(&Value::Int(3)));
        assert_eq!(fields.get("active"), Some(&Value::Bool(true)));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    enum SessionPhase {
        Greeting,
        AwaitingPayment,
        Closed,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Session {
        step: i64,
        active: bool,
        note: Option<String>,
        phase: SessionPhase,
        started_at: ember_core::Timestamp,
        context: SessionContext,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SessionContext {
        verified: bool,
        channel: String,
    }

    impl CacheRecord for Session {
        fn field_hints() -> FieldHints {
            FieldHints::new()
                .with("active", TypeHint::Bool)
                .with("started_at", TypeHint::Timestamp)
                .with(
                    "context",
                    TypeHint::Record(FieldHints::new().with("verified", TypeHint::Bool)),
                )
        }
    }

    #[test]
    fn test_typed_record_roundtrip() {
        let session = Session {
            step: 4,
            active: true,
            note: None,
            phase: SessionPhase::AwaitingPayment,
            started_at: chrono::DateTime::from_timestamp(1_700_000_000, 5_000).expect("valid"),
            context: SessionContext {
                verified: false,
                channel: "sms".to_string(),
            },
        };

        let raw = encode_record(&session).expect("encodes");
        assert_eq!(raw.get("active").map(String::as_str), Some("1"));
        assert_eq!(raw.get("step").map(String::as_str), Some("4"));
        assert_eq!(raw.get("note").map(String::as_str), Some("null"));
        // Enumerations store their underlying value, nothing more.
        assert_eq!(
            raw.get("phase").map(String::as_str),
            Some("awaiting_payment")
        );

        let rebuilt: Session = decode_record(&raw).expect("rebuilds");
        assert_eq!(rebuilt, session);
    }

    #[test]
    fn test_typed_record_decode_failure_names_type() {
        let raw = BTreeMap::from([
            ("step".to_string(), "not-a-number".to_string()),
            ("active".to_string(), "1".to_string()),
        ]);
        let err = decode_record::<Session>(&raw).expect_err("must fail");
        match err {
            SerializationError::Record { type_name, .. } => {
                assert!(type_name.contains("Session"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_encode_element_is_json_fragment() {
        assert_eq!(encode_element(&Value::Int(3)), "3");
        assert_eq!(encode_element(&Value::Text("x".to_string())), "\"x\"");
        assert_eq!(encode_element(&Value::Bool(true)), "\"1\"");
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    /// Values whose structured JSON form is self-describing (no booleans or
    /// timestamps, which need hints to reconstruct).
    fn json_safe_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<i64>().prop_map(Value::Int),
            any::<f64>()
                .prop_filter("finite floats only", |f| f.is_finite())
                .prop_map(Value::Float),
            "[a-zA-Z0-9 :_.{}-]{0,16}".prop_map(Value::Text),
        ];
        leaf.prop_recursive(3, 24, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                prop::collection::btree_map("[a-z_]{1,8}", inner, 0..4).prop_map(Value::Map),
            ]
        })
    }

    fn micro_timestamp() -> impl Strategy<Value = ember_core::Timestamp> {
        (0i64..4_000_000_000i64, 0u32..1_000_000u32).prop_map(|(secs, micros)| {
            chrono::DateTime::from_timestamp(secs, micros * 1_000).expect("in range")
        })
    }

    proptest! {
        /// Property: hinted scalar decode inverts encode.
        #[test]
        fn prop_int_roundtrip(i in any::<i64>()) {
            let repr = encode(&Value::Int(i));
            prop_assert_eq!(decode(&repr, Some(&TypeHint::Int)).expect("decodes"), Value::Int(i));
        }

        #[test]
        fn prop_float_roundtrip(f in any::<f64>().prop_filter("finite", |f| f.is_finite())) {
            let repr = encode(&Value::Float(f));
            prop_assert_eq!(decode(&repr, Some(&TypeHint::Float)).expect("decodes"), Value::Float(f));
        }

        #[test]
        fn prop_text_roundtrip(s in ".{0,32}") {
            let repr = encode(&Value::Text(s.clone()));
            prop_assert_eq!(
                decode(&repr, Some(&TypeHint::Text)).expect("decodes"),
                Value::Text(s)
            );
        }

        #[test]
        fn prop_timestamp_roundtrip(ts in micro_timestamp()) {
            let repr = encode(&Value::Timestamp(ts));
            prop_assert_eq!(
                decode(&repr, Some(&TypeHint::Timestamp)).expect("decodes"),
                Value::Timestamp(ts)
            );
        }

        /// Property: structured maps of self-describing values roundtrip.
        #[test]
        fn prop_map_roundtrip(entries in prop::collection::btree_map("[a-z_]{1,8}", json_safe_value(), 0..5)) {
            let map = Value::Map(entries);
            let repr = encode(&map);
            let decoded = decode(&repr, Some(&TypeHint::Map)).expect("decodes");
            prop_assert_eq!(decoded, map);
        }

        /// Property: lists of self-describing values roundtrip.
        #[test]
        fn prop_list_roundtrip(items in prop::collection::vec(json_safe_value(), 0..5)) {
            let list = Value::List(items);
            let repr = encode(&list);
            let decoded = decode(&repr, Some(&TypeHint::List)).expect("decodes");
            prop_assert_eq!(decoded, list);
        }
    }

    #[test]
    fn map_with_colliding_scalar_texts_roundtrips() {
        // Inside JSON, strings are quoted, so text that looks numeric stays text.
        let map = Value::Map(BTreeMap::from([
            ("a".to_string(), Value::Text("1".to_string())),
            ("b".to_string(), Value::Int(1)),
        ]));
        let repr = encode(&map);
        assert_eq!(decode(&repr, Some(&TypeHint::Map)).expect("decodes"), map);
    }
}

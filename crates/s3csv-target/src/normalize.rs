//! Float-to-decimal normalization
//!
//! JSON numbers arrive as `f64`. Before validation, both the schema document and
//! every record are rewritten so each floating-point leaf becomes an exact
//! [`BigDecimal`] built from the float's shortest round-trip text. `0.1` stays
//! `0.1` rather than the binary expansion
//! `0.1000000000000000055511151231257827...`, which keeps `multipleOf` and
//! bound checks honest.

use bigdecimal::BigDecimal;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

/// JSON tree with floats replaced by exact decimals
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Null,
    Bool(bool),
    Integer(i128),
    Decimal(BigDecimal),
    String(String),
    Array(Vec<Normalized>),
    Object(BTreeMap<String, Normalized>),
}

/// Normalize an arbitrary JSON value
pub fn normalize(value: &Value) -> Normalized {
    match value {
        Value::Null => Normalized::Null,
        Value::Bool(b) => Normalized::Bool(*b),
        Value::Number(n) => normalize_number(n),
        Value::String(s) => Normalized::String(s.clone()),
        Value::Array(items) => Normalized::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => Normalized::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize(v)))
                .collect(),
        ),
    }
}

/// Normalize a record body
pub fn normalize_record(record: &Map<String, Value>) -> Normalized {
    Normalized::Object(
        record
            .iter()
            .map(|(k, v)| (k.clone(), normalize(v)))
            .collect(),
    )
}

fn normalize_number(n: &Number) -> Normalized {
    if let Some(i) = n.as_i64() {
        return Normalized::Integer(i128::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Normalized::Integer(i128::from(u));
    }
    match n.as_f64() {
        // Display for f64 is the shortest text that round-trips
        Some(f) => {
            let text = f.to_string();
            match BigDecimal::from_str(&text) {
                Ok(decimal) => Normalized::Decimal(decimal),
                Err(_) => Normalized::String(text),
            }
        },
        None => Normalized::String(n.to_string()),
    }
}

impl Normalized {
    /// Numeric leaves as exact decimals
    pub fn as_decimal(&self) -> Option<BigDecimal> {
        match self {
            Normalized::Integer(i) => BigDecimal::from_str(&i.to_string()).ok(),
            Normalized::Decimal(d) => Some(d.clone()),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Normalized> {
        match self {
            Normalized::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Convert back to a plain JSON value (decimals become the nearest `f64`)
    pub fn to_value(&self) -> Value {
        match self {
            Normalized::Null => Value::Null,
            Normalized::Bool(b) => Value::Bool(*b),
            Normalized::Integer(i) => {
                if let Ok(v) = i64::try_from(*i) {
                    Value::from(v)
                } else if let Ok(v) = u64::try_from(*i) {
                    Value::from(v)
                } else {
                    Value::String(i.to_string())
                }
            },
            Normalized::Decimal(d) => d
                .to_string()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Normalized::String(s) => Value::String(s.clone()),
            Normalized::Array(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            Normalized::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn decimal(text: &str) -> Normalized {
        Normalized::Decimal(BigDecimal::from_str(text).unwrap())
    }

    #[test]
    fn test_float_uses_shortest_representation() {
        let normalized = normalize(&json!(0.1));
        assert_eq!(normalized, decimal("0.1"));
        assert_eq!(normalized.as_decimal().unwrap().to_string(), "0.1");
    }

    #[test]
    fn test_integers_and_strings_untouched() {
        assert_eq!(normalize(&json!(42)), Normalized::Integer(42));
        assert_eq!(normalize(&json!(u64::MAX)), Normalized::Integer(i128::from(u64::MAX)));
        assert_eq!(normalize(&json!("0.1")), Normalized::String("0.1".to_string()));
        assert_eq!(normalize(&json!(null)), Normalized::Null);
    }

    #[test]
    fn test_nested_structures() {
        let normalized = normalize(&json!({
            "price": 19.99,
            "tags": [1.5, "x"],
            "dims": {"w": 0.3}
        }));
        assert_eq!(normalized.get("price"), Some(&decimal("19.99")));
        assert_eq!(
            normalized.get("tags"),
            Some(&Normalized::Array(vec![
                decimal("1.5"),
                Normalized::String("x".to_string())
            ]))
        );
        assert_eq!(normalized.get("dims").and_then(|d| d.get("w")), Some(&decimal("0.3")));
    }

    #[test]
    fn test_schema_constraint_precision() {
        let schema = normalize(&json!({"type": "number", "multipleOf": 0.01}));
        assert_eq!(
            schema.get("multipleOf").and_then(Normalized::as_decimal),
            Some(BigDecimal::from_str("0.01").unwrap())
        );
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            (-1.0e12f64..1.0e12f64).prop_map(|f| json!(f)),
            "[a-z0-9.]{0,8}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_normalization_is_idempotent(value in arb_json()) {
            let once = normalize(&value);
            let twice = normalize(&once.to_value());
            prop_assert_eq!(once, twice);
        }
    }
}

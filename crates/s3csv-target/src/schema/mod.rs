//! Per-stream schema registry
//!
//! Each SCHEMA message replaces the stream's entry wholesale: the stored
//! document, the compiled validator and the key properties. Records are always
//! validated against the latest declaration.
//!
//! Validation runs three passes over the normalized record:
//!
//! - every `multipleOf` the record reaches, through any subschema keyword, is
//!   checked for evaluability. A quotient wider than [`MAX_QUOTIENT_DIGITS`]
//!   yields [`TargetError::UnsupportedPrecision`].
//! - `multipleOf` constraints reachable through `properties`, `items` and
//!   `allOf` are lifted out of the document and decided with exact integer
//!   arithmetic.
//! - everything else goes through a Draft 7 `jsonschema` validator with format
//!   checking enabled. Draft 4 boolean `exclusiveMaximum`/`exclusiveMinimum`
//!   are rewritten to the Draft 7 form first. A document that still does not
//!   compile leaves the stream without structural validation.

mod precision;

use crate::error::{Result, TargetError};
use crate::metadata;
use crate::normalize::{normalize, normalize_record, Normalized};
use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Widest integer quotient `multipleOf` evaluation accepts
pub const MAX_QUOTIENT_DIGITS: usize = 28;

/// Latest declaration for one stream
pub struct StreamSchema {
    /// Schema as stored (with lineage columns when enabled)
    pub schema: Value,
    pub key_properties: Vec<String>,
    pub bookmark_properties: Option<Vec<String>>,
    validator: CompiledSchema,
}

impl std::fmt::Debug for StreamSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSchema")
            .field("schema", &self.schema)
            .field("key_properties", &self.key_properties)
            .finish_non_exhaustive()
    }
}

struct CompiledSchema {
    /// `None` when the document could not be compiled
    structural: Option<jsonschema::Validator>,
    numeric: NumericRule,
}

/// `multipleOf` constraints lifted out of a schema document
#[derive(Debug, Default)]
struct NumericRule {
    multiple_of: Option<BigDecimal>,
    properties: Vec<(String, NumericRule)>,
    items: Option<Box<NumericRule>>,
    all_of: Vec<NumericRule>,
}

impl NumericRule {
    fn is_empty(&self) -> bool {
        self.multiple_of.is_none()
            && self.properties.is_empty()
            && self.items.is_none()
            && self.all_of.is_empty()
    }

    /// Remove evaluable `multipleOf` keywords from `schema` and collect them
    fn extract(schema: &mut Value) -> Self {
        let mut rule = NumericRule::default();
        let Value::Object(map) = schema else {
            return rule;
        };

        if let Some(raw) = map.remove("multipleOf") {
            match normalize(&raw).as_decimal() {
                Some(d) if d > BigDecimal::from(0) => rule.multiple_of = Some(d),
                // let the structural validator reject it
                _ => {
                    map.insert("multipleOf".to_string(), raw);
                },
            }
        }

        if let Some(Value::Object(properties)) = map.get_mut("properties") {
            for (name, sub) in properties.iter_mut() {
                let child = Self::extract(sub);
                if !child.is_empty() {
                    rule.properties.push((name.clone(), child));
                }
            }
        }

        if let Some(items) = map.get_mut("items") {
            if items.is_object() {
                let child = Self::extract(items);
                if !child.is_empty() {
                    rule.items = Some(Box::new(child));
                }
            }
        }

        if let Some(Value::Array(all_of)) = map.get_mut("allOf") {
            for sub in all_of.iter_mut() {
                let child = Self::extract(sub);
                if !child.is_empty() {
                    rule.all_of.push(child);
                }
            }
        }

        rule
    }

    fn check(
        &self,
        instance: &Normalized,
        path: &str,
        violations: &mut Vec<String>,
    ) -> std::result::Result<(), String> {
        if let (Some(multiple), Some(value)) = (&self.multiple_of, instance.as_decimal()) {
            if !is_multiple_of(&value, multiple)
                .map_err(|detail| format!("{} at '{}'", detail, path))?
            {
                violations.push(format!("{} is not a multiple of {} at '{}'", value, multiple, path));
            }
        }

        for (name, rule) in &self.properties {
            if let Some(child) = instance.get(name) {
                rule.check(child, &format!("{}/{}", path, name), violations)?;
            }
        }

        if let (Some(rule), Normalized::Array(items)) = (&self.items, instance) {
            for (index, item) in items.iter().enumerate() {
                rule.check(item, &format!("{}/{}", path, index), violations)?;
            }
        }

        for rule in &self.all_of {
            rule.check(instance, path, violations)?;
        }

        Ok(())
    }
}

/// Exact `value % multiple == 0`
///
/// Fails when the integer quotient has more than [`MAX_QUOTIENT_DIGITS`] digits.
pub fn is_multiple_of(value: &BigDecimal, multiple: &BigDecimal) -> std::result::Result<bool, String> {
    let (_, value_scale) = value.as_bigint_and_exponent();
    let (_, multiple_scale) = multiple.as_bigint_and_exponent();
    let scale = value_scale.max(multiple_scale);

    let (numerator, _) = value.with_scale(scale).into_bigint_and_exponent();
    let (denominator, _) = multiple.with_scale(scale).into_bigint_and_exponent();
    if denominator == BigInt::from(0) {
        return Err(format!("multipleOf {} is not positive", multiple));
    }

    let quotient = &numerator / &denominator;
    let digits = quotient.to_string().trim_start_matches('-').len();
    if digits > MAX_QUOTIENT_DIGITS {
        return Err(format!(
            "checking {} against multipleOf {} needs a {}-digit quotient",
            value, multiple, digits
        ));
    }

    Ok(&numerator % &denominator == BigInt::from(0))
}

fn compile(stream: &str, schema: &Value) -> CompiledSchema {
    let mut structural_doc = schema.clone();
    upgrade_draft4_bounds(&mut structural_doc);
    let numeric = NumericRule::extract(&mut structural_doc);
    let structural_doc = normalize(&structural_doc).to_value();

    let structural = match jsonschema::options()
        .with_draft(jsonschema::Draft::Draft7)
        .should_validate_formats(true)
        .build(&structural_doc)
    {
        Ok(validator) => Some(validator),
        Err(e) => {
            warn!(
                stream,
                error = %e,
                "Schema cannot be compiled, records will be written without structural validation"
            );
            None
        },
    };

    CompiledSchema { structural, numeric }
}

/// Rewrite Draft 4 boolean exclusive bounds into Draft 7 numeric ones
///
/// `{"maximum": 10, "exclusiveMaximum": true}` becomes `{"exclusiveMaximum": 10}`;
/// a `false` flag is dropped and the inclusive bound kept.
fn upgrade_draft4_bounds(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            for (exclusive, bound) in [("exclusiveMaximum", "maximum"), ("exclusiveMinimum", "minimum")] {
                if let Some(flag) = map.get(exclusive).and_then(Value::as_bool) {
                    map.remove(exclusive);
                    if flag {
                        if let Some(limit) = map.remove(bound) {
                            map.insert(exclusive.to_string(), limit);
                        }
                    }
                }
            }
            for (keyword, value) in map.iter_mut() {
                // instance data, not subschemas
                if !matches!(keyword.as_str(), "enum" | "const" | "default" | "examples") {
                    upgrade_draft4_bounds(value);
                }
            }
        },
        Value::Array(items) => items.iter_mut().for_each(upgrade_draft4_bounds),
        _ => {},
    }
}

/// Schemas, validators and key properties keyed by stream name
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    streams: HashMap<String, StreamSchema>,
    add_metadata_columns: bool,
}

impl SchemaRegistry {
    pub fn new(add_metadata_columns: bool) -> Self {
        Self {
            streams: HashMap::new(),
            add_metadata_columns,
        }
    }

    /// Store (or replace) the declaration for `stream`
    pub fn declare(
        &mut self,
        stream: &str,
        schema: Value,
        key_properties: Vec<String>,
        bookmark_properties: Option<Vec<String>>,
    ) {
        let schema = if self.add_metadata_columns {
            metadata::add_metadata_columns_to_schema(schema)
        } else {
            schema
        };

        let validator = compile(stream, &schema);
        let replaced = self
            .streams
            .insert(
                stream.to_string(),
                StreamSchema {
                    schema,
                    key_properties,
                    bookmark_properties,
                    validator,
                },
            )
            .is_some();

        debug!(stream, replaced, "Schema declared");
    }

    /// Entry for `stream`; fails if no schema was ever declared for it
    pub fn lookup(&self, stream: &str) -> Result<&StreamSchema> {
        self.streams
            .get(stream)
            .ok_or_else(|| TargetError::UnknownStream(stream.to_string()))
    }

    /// Validate `record` against the stream's current schema
    pub fn validate(&self, stream: &str, record: &Map<String, Value>) -> Result<()> {
        let entry = self.lookup(stream)?;
        let normalized = normalize_record(record);

        let unsupported = |detail: String| TargetError::UnsupportedPrecision {
            stream: stream.to_string(),
            detail,
        };
        precision::check(&entry.schema, &normalized).map_err(unsupported)?;

        let mut violations = Vec::new();
        entry
            .validator
            .numeric
            .check(&normalized, "", &mut violations)
            .map_err(unsupported)?;

        if let Some(structural) = &entry.validator.structural {
            let instance = normalized.to_value();
            violations.extend(structural.iter_errors(&instance).map(|e| e.to_string()));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(TargetError::SchemaViolation {
                stream: stream.to_string(),
                errors: violations,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn registry_with(schema: Value) -> SchemaRegistry {
        let mut registry = SchemaRegistry::new(false);
        registry.declare("orders", schema, vec!["id".to_string()], None);
        registry
    }

    #[test]
    fn test_lookup_unknown_stream() {
        let registry = SchemaRegistry::new(false);
        let err = registry.lookup("orders").unwrap_err();
        assert!(matches!(err, TargetError::UnknownStream(s) if s == "orders"));
    }

    #[test]
    fn test_valid_record() {
        let registry = registry_with(json!({
            "type": "object",
            "properties": {"id": {"type": "integer"}, "name": {"type": ["null", "string"]}}
        }));
        registry
            .validate("orders", &record(json!({"id": 1, "name": "a"})))
            .unwrap();
    }

    #[test]
    fn test_structural_violation() {
        let registry = registry_with(json!({
            "type": "object",
            "properties": {"id": {"type": "integer"}}
        }));
        let err = registry
            .validate("orders", &record(json!({"id": "one"})))
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_format_checking_enabled() {
        let registry = registry_with(json!({
            "type": "object",
            "properties": {"created_at": {"type": "string", "format": "date-time"}}
        }));
        assert!(registry
            .validate("orders", &record(json!({"created_at": "yesterday"})))
            .is_err());
        registry
            .validate("orders", &record(json!({"created_at": "2021-01-01T00:00:00Z"})))
            .unwrap();
    }

    #[test]
    fn test_multiple_of_is_exact() {
        let registry = registry_with(json!({
            "type": "object",
            "properties": {"price": {"type": "number", "multipleOf": 0.01}}
        }));
        // 0.07 / 0.01 is not an integer in binary floating point
        registry
            .validate("orders", &record(json!({"price": 0.07})))
            .unwrap();
        let err = registry
            .validate("orders", &record(json!({"price": 0.075})))
            .unwrap_err();
        assert!(matches!(err, TargetError::SchemaViolation { .. }));
    }

    #[test]
    fn test_multiple_of_inside_items_and_nested_objects() {
        let registry = registry_with(json!({
            "type": "object",
            "properties": {
                "lines": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {"qty": {"type": "number", "multipleOf": 0.5}}
                    }
                }
            }
        }));
        registry
            .validate("orders", &record(json!({"lines": [{"qty": 1.5}, {"qty": 2}]})))
            .unwrap();
        assert!(registry
            .validate("orders", &record(json!({"lines": [{"qty": 1.25}]})))
            .is_err());
    }

    #[test]
    fn test_unsupported_precision_is_fatal() {
        let registry = registry_with(json!({
            "type": "object",
            "properties": {"amount": {"type": "number", "multipleOf": 1e-30}}
        }));
        let err = registry
            .validate("orders", &record(json!({"amount": 12345.5})))
            .unwrap_err();
        assert!(matches!(err, TargetError::UnsupportedPrecision { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_is_multiple_of() {
        let d = |s: &str| BigDecimal::from_str(s).unwrap();
        assert!(is_multiple_of(&d("0.3"), &d("0.1")).unwrap());
        assert!(is_multiple_of(&d("-4.5"), &d("1.5")).unwrap());
        assert!(!is_multiple_of(&d("10"), &d("3")).unwrap());
        assert!(is_multiple_of(&d("0"), &d("0.0001")).unwrap());
        assert!(is_multiple_of(&d("1e40"), &d("1e-10")).is_err());
    }

    #[test]
    fn test_redeclare_replaces_schema() {
        let mut registry = registry_with(json!({
            "type": "object",
            "properties": {"id": {"type": "integer"}}
        }));
        registry.declare(
            "orders",
            json!({"type": "object", "properties": {"id": {"type": "string"}}}),
            vec![],
            None,
        );

        registry
            .validate("orders", &record(json!({"id": "abc"})))
            .unwrap();
        assert!(registry.lookup("orders").unwrap().key_properties.is_empty());
    }

    #[test]
    fn test_metadata_columns_added_to_schema() {
        let mut registry = SchemaRegistry::new(true);
        registry.declare(
            "orders",
            json!({"type": "object", "properties": {"id": {"type": "integer"}}}),
            vec!["id".to_string()],
            None,
        );
        let schema = &registry.lookup("orders").unwrap().schema;
        assert!(schema["properties"].get("_sdc_batched_at").is_some());
        assert!(schema["properties"].get("_sdc_sequence").is_some());
    }

    #[test]
    fn test_uncompilable_schema_keeps_stream_writable() {
        let registry = registry_with(json!({"type": 12}));
        assert!(registry.lookup("orders").is_ok());
        registry
            .validate("orders", &record(json!({"id": "anything"})))
            .unwrap();
    }

    /// Numeric column as emitted by tap-postgres: Draft 4 exclusive bounds
    fn postgres_numeric_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": ["integer"], "minimum": -2147483648, "maximum": 2147483647},
                "amount": {
                    "type": ["null", "number"],
                    "exclusiveMaximum": true,
                    "maximum": 1e38,
                    "multipleOf": 1e-2,
                    "exclusiveMinimum": true,
                    "minimum": -1e38
                }
            },
            "definitions": {"sdc_recursive_number_array": {"type": ["null", "number", "array"]}}
        })
    }

    #[test]
    fn test_draft4_numeric_schema_is_accepted() {
        let registry = registry_with(postgres_numeric_schema());
        assert!(registry.lookup("orders").unwrap().validator.structural.is_some());

        registry
            .validate("orders", &record(json!({"id": 1, "amount": 12.34})))
            .unwrap();
        registry
            .validate("orders", &record(json!({"id": 2, "amount": null})))
            .unwrap();
        let err = registry
            .validate("orders", &record(json!({"id": 3, "amount": 12.345})))
            .unwrap_err();
        assert!(matches!(err, TargetError::SchemaViolation { .. }));
    }

    #[test]
    fn test_draft4_exclusive_bounds_stay_exclusive() {
        let registry = registry_with(json!({
            "type": "object",
            "properties": {
                "ratio": {"type": "number", "maximum": 1, "exclusiveMaximum": true},
                "floor": {"type": "number", "minimum": 0, "exclusiveMinimum": false}
            }
        }));
        registry
            .validate("orders", &record(json!({"ratio": 0.5, "floor": 0})))
            .unwrap();
        assert!(registry
            .validate("orders", &record(json!({"ratio": 1})))
            .is_err());
    }

    #[test]
    fn test_upgrade_draft4_bounds() {
        let mut schema = json!({
            "properties": {
                "a": {"maximum": 10, "exclusiveMaximum": true},
                "b": {"minimum": 0, "exclusiveMinimum": false},
                "c": {"enum": [{"exclusiveMaximum": true}]}
            }
        });
        upgrade_draft4_bounds(&mut schema);
        assert_eq!(
            schema,
            json!({
                "properties": {
                    "a": {"exclusiveMaximum": 10},
                    "b": {"minimum": 0},
                    "c": {"enum": [{"exclusiveMaximum": true}]}
                }
            })
        );
    }

    #[test]
    fn test_unsupported_precision_inside_any_of() {
        let registry = registry_with(json!({
            "type": "object",
            "properties": {
                "amount": {"anyOf": [{"type": "null"}, {"type": "number", "multipleOf": 1e-30}]}
            }
        }));
        registry
            .validate("orders", &record(json!({"amount": null})))
            .unwrap();
        let err = registry
            .validate("orders", &record(json!({"amount": 12345.5})))
            .unwrap_err();
        assert!(matches!(err, TargetError::UnsupportedPrecision { .. }));
    }

    #[test]
    fn test_unsupported_precision_through_ref() {
        let registry = registry_with(json!({
            "type": "object",
            "definitions": {"money": {"type": "number", "multipleOf": 1e-30}},
            "additionalProperties": {"$ref": "#/definitions/money"}
        }));
        let err = registry
            .validate("orders", &record(json!({"total": 99999.25})))
            .unwrap_err();
        assert!(matches!(err, TargetError::UnsupportedPrecision { .. }));
    }
}

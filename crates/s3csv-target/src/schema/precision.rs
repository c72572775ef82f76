//! Evaluability of `multipleOf` across the whole schema
//!
//! Walks the schema alongside the record through every keyword that applies a
//! subschema (`properties`, `patternProperties`, `additionalProperties`,
//! `dependencies`, `items`, `additionalItems`, `contains`, `allOf`, `anyOf`,
//! `oneOf`, `not`, `if`/`then`/`else` and local `$ref`). Every numeric value
//! that meets a `multipleOf` must give a quotient the exact check can hold.
//! Whether the value is actually a multiple is decided elsewhere.

use super::is_multiple_of;
use crate::normalize::{normalize, Normalized};
use bigdecimal::BigDecimal;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Bound on `$ref` hops, so self-referencing schemas terminate
const MAX_REF_DEPTH: usize = 32;

/// Fail with a description when some `multipleOf` reached by `instance` cannot be evaluated
pub(super) fn check(root: &Value, instance: &Normalized) -> Result<(), String> {
    Walker { root }.walk(root, instance, "", 0)
}

struct Walker<'a> {
    root: &'a Value,
}

impl Walker<'_> {
    fn walk(&self, schema: &Value, instance: &Normalized, path: &str, refs: usize) -> Result<(), String> {
        let Value::Object(schema) = schema else {
            return Ok(());
        };

        // Draft 7 ignores siblings of $ref
        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            if refs < MAX_REF_DEPTH {
                if let Some(target) = self.resolve(reference) {
                    self.walk(target, instance, path, refs + 1)?;
                }
            }
            return Ok(());
        }

        if let (Some(raw), Some(value)) = (schema.get("multipleOf"), instance.as_decimal()) {
            let multiple = normalize(raw).as_decimal();
            if let Some(multiple) = multiple.filter(|m| *m > BigDecimal::from(0)) {
                is_multiple_of(&value, &multiple).map_err(|detail| format!("{} at '{}'", detail, path))?;
            }
        }

        for keyword in ["allOf", "anyOf", "oneOf"] {
            if let Some(Value::Array(branches)) = schema.get(keyword) {
                for branch in branches {
                    self.walk(branch, instance, path, refs)?;
                }
            }
        }
        for keyword in ["not", "if", "then", "else"] {
            if let Some(sub) = schema.get(keyword) {
                self.walk(sub, instance, path, refs)?;
            }
        }

        match instance {
            Normalized::Object(fields) => self.walk_object(schema, instance, fields, path, refs),
            Normalized::Array(items) => self.walk_array(schema, items, path, refs),
            _ => Ok(()),
        }
    }

    fn walk_object(
        &self,
        schema: &Map<String, Value>,
        instance: &Normalized,
        fields: &BTreeMap<String, Normalized>,
        path: &str,
        refs: usize,
    ) -> Result<(), String> {
        let properties = schema.get("properties").and_then(Value::as_object);
        // unparsable patterns cannot match anything jsonschema would check either
        let patterns: Vec<(Regex, &Value)> = schema
            .get("patternProperties")
            .and_then(Value::as_object)
            .map(|p| {
                p.iter()
                    .filter_map(|(pattern, sub)| Regex::new(pattern).ok().map(|re| (re, sub)))
                    .collect()
            })
            .unwrap_or_default();
        let additional = schema.get("additionalProperties");
        let dependencies = schema.get("dependencies").and_then(Value::as_object);

        for (name, value) in fields {
            let child_path = format!("{}/{}", path, name);
            let mut matched = false;

            if let Some(sub) = properties.and_then(|p| p.get(name)) {
                matched = true;
                self.walk(sub, value, &child_path, refs)?;
            }
            for (pattern, sub) in &patterns {
                if pattern.is_match(name) {
                    matched = true;
                    self.walk(sub, value, &child_path, refs)?;
                }
            }
            if !matched {
                if let Some(sub) = additional {
                    self.walk(sub, value, &child_path, refs)?;
                }
            }

            // schema dependencies apply to the whole object
            if let Some(sub @ Value::Object(_)) = dependencies.and_then(|d| d.get(name)) {
                self.walk(sub, instance, path, refs)?;
            }
        }

        Ok(())
    }

    fn walk_array(
        &self,
        schema: &Map<String, Value>,
        items: &[Normalized],
        path: &str,
        refs: usize,
    ) -> Result<(), String> {
        let item_path = |index: usize| format!("{}/{}", path, index);

        match schema.get("items") {
            Some(Value::Array(positional)) => {
                for (index, item) in items.iter().enumerate() {
                    let sub = positional.get(index).or_else(|| schema.get("additionalItems"));
                    if let Some(sub) = sub {
                        self.walk(sub, item, &item_path(index), refs)?;
                    }
                }
            },
            Some(sub) => {
                for (index, item) in items.iter().enumerate() {
                    self.walk(sub, item, &item_path(index), refs)?;
                }
            },
            None => {},
        }

        if let Some(sub) = schema.get("contains") {
            for (index, item) in items.iter().enumerate() {
                self.walk(sub, item, &item_path(index), refs)?;
            }
        }

        Ok(())
    }

    /// Local references only (`#` or `#/json/pointer`)
    fn resolve(&self, reference: &str) -> Option<&Value> {
        let pointer = reference.strip_prefix('#')?;
        self.root.pointer(pointer)
    }
}

//! Record flattening
//!
//! Nested objects become `parent__child` columns, visited in sorted key order
//! at every level. Arrays are never exploded: the whole array is stored as one
//! JSON-encoded string under its own column. Objects deeper than `max_level`
//! collapse into a JSON string the same way.

use serde_json::{Map, Value};

pub const DEFAULT_SEPARATOR: &str = "__";

/// Column names at or beyond this length get their segments abbreviated
pub const MAX_COLUMN_NAME_LENGTH: usize = 255;

#[derive(Debug, Clone)]
pub struct FlattenOptions {
    pub separator: String,
    /// Nesting depth expanded into columns; `None` expands everything
    pub max_level: Option<usize>,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            max_level: None,
        }
    }
}

/// Flatten a record into scalar (or JSON-string) columns
pub fn flatten_record(record: &Map<String, Value>, options: &FlattenOptions) -> Map<String, Value> {
    let mut columns = Map::new();
    let mut path = Vec::new();
    flatten_into(record, &mut path, options, &mut columns);
    columns
}

fn flatten_into(
    object: &Map<String, Value>,
    path: &mut Vec<String>,
    options: &FlattenOptions,
    columns: &mut Map<String, Value>,
) {
    let mut keys: Vec<&String> = object.keys().collect();
    keys.sort();

    for key in keys {
        let value = &object[key.as_str()];
        let expand = options.max_level.is_none_or(|max| path.len() < max);

        match value {
            Value::Object(child) if expand => {
                path.push(key.clone());
                flatten_into(child, path, options, columns);
                path.pop();
            },
            Value::Object(_) | Value::Array(_) => {
                columns.insert(
                    column_name(path, key, &options.separator),
                    Value::String(value.to_string()),
                );
            },
            scalar => {
                columns.insert(column_name(path, key, &options.separator), scalar.clone());
            },
        }
    }
}

/// Join `path` and `key`, abbreviating leading segments while the name is too long
fn column_name(path: &[String], key: &str, separator: &str) -> String {
    let mut segments: Vec<String> = path.to_vec();
    segments.push(key.to_string());

    let mut index = 0;
    while segments.join(separator).len() >= MAX_COLUMN_NAME_LENGTH && index < segments.len() {
        segments[index] = abbreviate(&segments[index]);
        index += 1;
    }

    segments.join(separator)
}

/// `order_line_items` -> `oli`; names without enough initials keep three chars
fn abbreviate(segment: &str) -> String {
    let initials: String = camelize(segment)
        .chars()
        .filter(|c| !c.is_ascii_lowercase())
        .collect();

    if initials.chars().count() > 1 {
        initials.to_lowercase()
    } else {
        segment.chars().take(3).collect::<String>().to_lowercase()
    }
}

fn camelize(segment: &str) -> String {
    segment
        .split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

//! Lineage (`_sdc_*`) columns
//!
//! With `add_metadata_columns` enabled every schema gains the lineage
//! properties and every record is stamped with them. Without it, any lineage
//! values a producer sent are stripped before the record is written.

use crate::message::RecordMessage;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

pub const SDC_BATCHED_AT: &str = "_sdc_batched_at";
pub const SDC_DELETED_AT: &str = "_sdc_deleted_at";
pub const SDC_EXTRACTED_AT: &str = "_sdc_extracted_at";
pub const SDC_PRIMARY_KEY: &str = "_sdc_primary_key";
pub const SDC_RECEIVED_AT: &str = "_sdc_received_at";
pub const SDC_SEQUENCE: &str = "_sdc_sequence";
pub const SDC_TABLE_VERSION: &str = "_sdc_table_version";

pub const METADATA_COLUMNS: [&str; 7] = [
    SDC_BATCHED_AT,
    SDC_DELETED_AT,
    SDC_EXTRACTED_AT,
    SDC_PRIMARY_KEY,
    SDC_RECEIVED_AT,
    SDC_SEQUENCE,
    SDC_TABLE_VERSION,
];

/// Add the lineage properties to a schema document
///
/// Non-object documents are returned unchanged.
pub fn add_metadata_columns_to_schema(mut schema: Value) -> Value {
    let Value::Object(root) = &mut schema else {
        return schema;
    };

    let properties = root
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(properties) = properties {
        let date_time = json!({"type": ["null", "string"], "format": "date-time"});
        let nullable_string = json!({"type": ["null", "string"]});

        properties.insert(SDC_BATCHED_AT.to_string(), date_time.clone());
        properties.insert(SDC_DELETED_AT.to_string(), nullable_string.clone());
        properties.insert(SDC_EXTRACTED_AT.to_string(), date_time.clone());
        properties.insert(SDC_PRIMARY_KEY.to_string(), nullable_string.clone());
        properties.insert(SDC_RECEIVED_AT.to_string(), date_time);
        properties.insert(SDC_SEQUENCE.to_string(), json!({"type": ["integer"]}));
        properties.insert(SDC_TABLE_VERSION.to_string(), json!({"type": ["null", "integer"]}));
    }

    schema
}

/// Record body stamped with lineage values
pub fn add_metadata_values_to_record(
    message: &RecordMessage,
    key_properties: &[String],
    now: DateTime<Utc>,
) -> Map<String, Value> {
    let mut record = message.record.clone();
    let timestamp = now.to_rfc3339_opts(SecondsFormat::Micros, true);

    let deleted_at = record.get(SDC_DELETED_AT).cloned().unwrap_or(Value::Null);
    let primary_key = if key_properties.is_empty() {
        Value::Null
    } else {
        Value::String(key_properties.join(","))
    };

    record.insert(SDC_BATCHED_AT.to_string(), Value::String(timestamp.clone()));
    record.insert(SDC_DELETED_AT.to_string(), deleted_at);
    record.insert(
        SDC_EXTRACTED_AT.to_string(),
        message
            .time_extracted
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    record.insert(SDC_PRIMARY_KEY.to_string(), primary_key);
    record.insert(SDC_RECEIVED_AT.to_string(), Value::String(timestamp));
    record.insert(SDC_SEQUENCE.to_string(), Value::from(now.timestamp_millis()));
    record.insert(
        SDC_TABLE_VERSION.to_string(),
        message.version.map(Value::from).unwrap_or(Value::Null),
    );

    record
}

/// Record body with any lineage values removed
pub fn remove_metadata_values_from_record(message: &RecordMessage) -> Map<String, Value> {
    let mut record = message.record.clone();
    for column in METADATA_COLUMNS {
        record.shift_remove(column);
    }
    record
}

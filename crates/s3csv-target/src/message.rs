//! Input protocol: one JSON message per line
//!
//! ```text
//! {"type":"SCHEMA","stream":"orders","schema":{...},"key_properties":["id"]}
//! {"type":"RECORD","stream":"orders","record":{"id":1}}
//! {"type":"STATE","value":{"bookmarks":{}}}
//! {"type":"ACTIVATE_VERSION","stream":"orders","version":1}
//! ```
//!
//! Lines are decoded once at the boundary into [`Message`]. Unrecognised
//! `type` tags decode to [`Message::Unknown`] so the processor can warn and
//! carry on; anything that is not a JSON object with the required keys is a
//! [`TargetError::MalformedInput`].

use crate::error::{Result, TargetError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchemaMessage {
    pub stream: String,
    pub schema: Value,
    pub key_properties: Vec<String>,
    #[serde(default)]
    pub bookmark_properties: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordMessage {
    pub stream: String,
    pub record: Map<String, Value>,
    #[serde(default)]
    pub version: Option<i64>,
    /// RFC 3339 extraction time set by the producer
    #[serde(default)]
    pub time_extracted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StateMessage {
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActivateVersionMessage {
    pub stream: String,
    pub version: i64,
}

/// A decoded protocol message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Schema(SchemaMessage),
    Record(RecordMessage),
    State(StateMessage),
    ActivateVersion(ActivateVersionMessage),
    /// Any other `type` tag; kept verbatim for the warning
    Unknown { message_type: String, raw: Value },
}

impl Message {
    /// Decode one input line (`line` is 1-based, used in errors only)
    pub fn parse(input: &str, line: usize) -> Result<Self> {
        let malformed = |reason: String| TargetError::MalformedInput { line, reason };

        let raw: Value = serde_json::from_str(input).map_err(|e| malformed(e.to_string()))?;

        let message_type = raw
            .get("type")
            .ok_or_else(|| malformed("message is missing required key 'type'".to_string()))?
            .as_str()
            .ok_or_else(|| malformed("'type' must be a string".to_string()))?
            .to_string();

        let message = match message_type.as_str() {
            "SCHEMA" => Message::Schema(decode(raw, line)?),
            "RECORD" => Message::Record(decode(raw, line)?),
            "STATE" => Message::State(decode(raw, line)?),
            "ACTIVATE_VERSION" => Message::ActivateVersion(decode(raw, line)?),
            _ => Message::Unknown { message_type, raw },
        };

        Ok(message)
    }
}

fn decode<T: DeserializeOwned>(raw: Value, line: usize) -> Result<T> {
    serde_json::from_value(raw).map_err(|e| TargetError::MalformedInput {
        line,
        reason: e.to_string(),
    })
}

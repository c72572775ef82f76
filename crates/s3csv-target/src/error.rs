//! Error types for the target
//!
//! Every variant except [`TargetError::SchemaViolation`] terminates the run.
//! Schema violations are reported by the registry but the stream processor only
//! logs them and keeps writing the record.

use thiserror::Error;

/// Result type alias for target operations
pub type Result<T> = std::result::Result<T, TargetError>;

/// Error type for the ingestion pipeline and the upload stage
#[derive(Error, Debug)]
pub enum TargetError {
    /// Input line is not a valid message envelope
    #[error("Unable to parse message on line {line}: {reason}")]
    MalformedInput { line: usize, reason: String },

    /// RECORD arrived before any SCHEMA for its stream
    #[error("A record for stream '{0}' was encountered before a corresponding schema")]
    UnknownStream(String),

    /// Numeric constraint too precise for exact evaluation
    #[error(
        "Data validation failed and cannot load to destination for stream '{stream}': {detail}. \
         'multipleOf' validations that allow long precisions are not supported \
         (i.e. with 28 digits or more). Try removing 'multipleOf' from the JSON schema."
    )]
    UnsupportedPrecision { stream: String, detail: String },

    /// Record does not conform to the stream's schema
    #[error("Record for stream '{stream}' failed schema validation: {}", .errors.join("; "))]
    SchemaViolation { stream: String, errors: Vec<String> },

    #[error("Compression type '{0}' is not supported. Expected: 'none' or 'gzip'")]
    UnsupportedCompression(String),

    #[error("Encryption type '{0}' is not supported. Expected: 'none' or 'KMS'")]
    UnsupportedEncryption(String),

    /// Transient transfer failures persisted past the retry budget
    #[error("Upload of '{key}' still failing after {attempts} attempts: {reason}")]
    TransientTransfer {
        key: String,
        attempts: u32,
        reason: String,
    },

    /// Non-retriable transfer failure
    #[error("Upload of '{key}' failed: {reason}")]
    Transfer { key: String, reason: String },

    #[error("Invalid configuration:\n   * {}", .0.join("\n   * "))]
    ConfigurationInvalid(Vec<String>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] s3csv_common::CommonError),
}

impl TargetError {
    /// Whether the pipeline may continue after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TargetError::SchemaViolation { .. })
    }
}

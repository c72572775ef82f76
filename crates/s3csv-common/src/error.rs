//! Error types shared across s3csv crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Error type for the shared utilities
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Compression error for '{path}': {source}")]
    Compression {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

//! Singer target that buffers streams into CSV files and ships them to S3
//!
//! Messages are read line by line from the input. Each stream's records are
//! validated against its declared schema, flattened, and appended to a local
//! CSV buffer file. Once the input is exhausted every buffer file is uploaded
//! (optionally gzip-compressed and KMS-encrypted) and the last checkpoint seen
//! is handed back to the caller.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod buffer;
pub mod config;
pub mod error;
pub mod flatten;
pub mod message;
pub mod metadata;
pub mod normalize;
pub mod processor;
pub mod schema;
pub mod target_key;
pub mod upload;

pub use config::TargetConfig;
pub use error::{Result, TargetError};
pub use processor::{BufferFile, Clock, FixedClock, StreamProcessor, SystemClock};
pub use upload::{ObjectStore, S3ObjectStore, UploadStage};

use processor::ProcessorOptions;
use serde_json::Value;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{debug, info};

/// Run the whole pipeline: ingest `input`, then upload every buffer file
///
/// Returns the checkpoint to emit, which is only known to be safe once all
/// uploads have succeeded.
pub async fn persist_messages<R>(
    input: R,
    config: &TargetConfig,
    store: Arc<dyn ObjectStore>,
    clock: Box<dyn Clock>,
) -> Result<Option<Value>>
where
    R: BufRead + Send + 'static,
{
    let processor = StreamProcessor::new(ProcessorOptions::from(config), clock)?;
    info!("Processing input with run timestamp {}", processor.run_timestamp());

    let outcome = tokio::task::spawn_blocking(move || processor.process(input))
        .await
        .map_err(|e| TargetError::Io(std::io::Error::other(e)))??;

    UploadStage::new(config, store)
        .upload_all(&outcome.files)
        .await?;

    Ok(outcome.state)
}

/// Write the checkpoint as one JSON line; nothing is written without one
pub fn emit_state<W: Write>(mut writer: W, state: Option<&Value>) -> Result<()> {
    if let Some(state) = state {
        let line = serde_json::to_string(state)?;
        debug!("Emitting state {}", line);
        writeln!(writer, "{}", line)?;
        writer.flush()?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_emit_state_writes_one_line() {
        let mut out = Vec::new();
        emit_state(&mut out, Some(&json!({"bookmarks": {"orders": 3}}))).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\"bookmarks\":{\"orders\":3}}\n");
    }

    #[test]
    fn test_emit_state_without_checkpoint() {
        let mut out = Vec::new();
        emit_state(&mut out, None).unwrap();
        assert!(out.is_empty());
    }
}

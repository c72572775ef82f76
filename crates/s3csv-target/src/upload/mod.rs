//! Upload stage
//!
//! Runs once the input is exhausted: every buffer file registered by the
//! stream processor is optionally gzip-compressed, transferred to the object
//! store under its target key, and removed from local disk.
//!
//! Compression and encryption settings are checked before the first transfer,
//! so an unsupported value never leaves a partial upload behind.

pub mod retry;
pub mod s3;

pub use retry::{with_retry, RetryPolicy};
pub use s3::S3ObjectStore;

use crate::config::TargetConfig;
use crate::error::{Result, TargetError};
use crate::processor::BufferFile;
use async_trait::async_trait;
use futures::future::join_all;
use s3csv_common::compression::gzip_file;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    /// Parse the `compression` setting; unset means no compression
    pub fn parse(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            None | Some("") => Ok(Self::None),
            Some(v) if v.eq_ignore_ascii_case("none") => Ok(Self::None),
            Some(v) if v.eq_ignore_ascii_case("gzip") => Ok(Self::Gzip),
            Some(v) => Err(TargetError::UnsupportedCompression(v.to_string())),
        }
    }
}

/// Server-side encryption requested for uploaded objects
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Encryption {
    #[default]
    None,
    /// SSE-KMS; without a key id the bucket's default KMS key is used
    Kms { key_id: Option<String> },
}

impl Encryption {
    /// Parse `encryption_type` together with `encryption_key`
    pub fn parse(kind: Option<&str>, key: Option<&str>) -> Result<Self> {
        match kind.map(str::trim) {
            None | Some("") => Ok(Self::None),
            Some(v) if v.eq_ignore_ascii_case("none") => Ok(Self::None),
            Some(v) if v.eq_ignore_ascii_case("kms") => Ok(Self::Kms {
                key_id: key.filter(|k| !k.is_empty()).map(str::to_string),
            }),
            Some(v) => Err(TargetError::UnsupportedEncryption(v.to_string())),
        }
    }

    pub fn describe(&self) -> &str {
        match self {
            Self::None => "no encryption",
            Self::Kms { key_id: None } => "KMS encryption (default key)",
            Self::Kms { key_id: Some(_) } => "KMS encryption",
        }
    }
}

// ============================================================================
// Object store seam
// ============================================================================

/// Failure of a single transfer attempt, classified for the retry loop
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("{0}")]
    Fatal(String),
}

/// Destination for buffer files
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Transfer one local file to `bucket`/`key`
    async fn upload(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
        encryption: &Encryption,
    ) -> std::result::Result<(), TransferError>;
}

// ============================================================================
// Stage
// ============================================================================

pub struct UploadStage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    compression: Option<String>,
    encryption_type: Option<String>,
    encryption_key: Option<String>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl UploadStage {
    pub fn new(config: &TargetConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            bucket: config.s3_bucket().to_string(),
            compression: config.compression.clone(),
            encryption_type: config.encryption_type.clone(),
            encryption_key: config.encryption_key.clone(),
            retry: config.retry_policy(),
            concurrency: config.upload_concurrency(),
        }
    }

    /// Upload every file, at most `upload_concurrency` at a time
    ///
    /// Files in flight when one fails are allowed to finish; no further files
    /// are started and the first failure is returned.
    #[instrument(skip_all, fields(bucket = %self.bucket, files = files.len()))]
    pub async fn upload_all(&self, files: &[BufferFile]) -> Result<()> {
        let compression = Compression::parse(self.compression.as_deref())?;
        let encryption =
            Encryption::parse(self.encryption_type.as_deref(), self.encryption_key.as_deref())?;

        for batch in files.chunks(self.concurrency) {
            let results = join_all(
                batch
                    .iter()
                    .map(|file| self.upload_one(file, compression, &encryption)),
            )
            .await;

            results.into_iter().collect::<Result<Vec<()>>>()?;
        }

        info!("Uploaded {} file(s)", files.len());
        Ok(())
    }

    async fn upload_one(
        &self,
        file: &BufferFile,
        compression: Compression,
        encryption: &Encryption,
    ) -> Result<()> {
        let source = match compression {
            Compression::None => file.path.clone(),
            Compression::Gzip => {
                info!("Compressing file as '{}.gz'", file.path.display());
                let path = file.path.clone();
                tokio::task::spawn_blocking(move || gzip_file(&path))
                    .await
                    .map_err(|e| TargetError::Io(std::io::Error::other(e)))??
            },
        };
        let key = file.key.as_str();

        info!(
            "Uploading {} to bucket {} at {} with {}",
            source.display(),
            self.bucket,
            key,
            encryption.describe()
        );

        with_retry(&self.retry, key, || {
            self.store.upload(&source, &self.bucket, key, encryption)
        })
        .await?;

        remove_local(&file.path).await;
        if source != file.path {
            remove_local(&source).await;
        }
        Ok(())
    }
}

async fn remove_local(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove uploaded buffer file");
    }
}

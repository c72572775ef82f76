//! Target configuration
//!
//! Loaded from the JSON file passed with `--config`. Unknown keys are ignored
//! so one file can be shared with other tooling.

use crate::error::{Result, TargetError};
use crate::flatten::{FlattenOptions, DEFAULT_SEPARATOR};
use crate::upload::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_DELIMITER: &str = ",";
pub const DEFAULT_QUOTECHAR: &str = "\"";
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 10;
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetConfig {
    // ------------------------------------------------------------------------
    // Destination
    // ------------------------------------------------------------------------
    pub s3_bucket: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_session_token: Option<String>,
    pub aws_profile: Option<String>,
    pub aws_endpoint_url: Option<String>,
    pub aws_region: Option<String>,

    // ------------------------------------------------------------------------
    // Buffer files
    // ------------------------------------------------------------------------
    pub delimiter: Option<String>,
    pub quotechar: Option<String>,
    pub temp_dir: Option<String>,
    #[serde(default)]
    pub add_metadata_columns: bool,
    pub flatten_max_level: Option<usize>,

    // ------------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------------
    pub naming_convention: Option<String>,
    pub s3_key_prefix: Option<String>,

    // ------------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------------
    pub compression: Option<String>,
    pub encryption_type: Option<String>,
    pub encryption_key: Option<String>,
    pub upload_concurrency: Option<usize>,
    pub retry_max_attempts: Option<u32>,
    pub retry_base_delay_secs: Option<u64>,
}

impl TargetConfig {
    /// Read a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Problems that prevent a run; empty means the config is usable
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if is_blank(&self.s3_bucket) {
            errors.push("Required key is missing from config: [s3_bucket]".to_string());
        }

        if is_blank(&self.aws_profile) {
            for (key, value) in [
                ("aws_access_key_id", &self.aws_access_key_id),
                ("aws_secret_access_key", &self.aws_secret_access_key),
            ] {
                if is_blank(value) {
                    errors.push(format!(
                        "Required key is missing from config: [{}] (or set aws_profile)",
                        key
                    ));
                }
            }
        }

        for (key, value) in [("delimiter", &self.delimiter), ("quotechar", &self.quotechar)] {
            if let Some(value) = value {
                if value.len() != 1 {
                    errors.push(format!("{} must be a single byte character, got '{}'", key, value));
                }
            }
        }

        if self.upload_concurrency == Some(0) {
            errors.push("upload_concurrency must be greater than 0".to_string());
        }
        if self.retry_max_attempts == Some(0) {
            errors.push("retry_max_attempts must be greater than 0".to_string());
        }

        errors
    }

    /// Fail with [`TargetError::ConfigurationInvalid`] when [`validate`](Self::validate) reports problems
    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TargetError::ConfigurationInvalid(errors))
        }
    }

    pub fn delimiter(&self) -> u8 {
        single_byte(&self.delimiter, DEFAULT_DELIMITER)
    }

    pub fn quotechar(&self) -> u8 {
        single_byte(&self.quotechar, DEFAULT_QUOTECHAR)
    }

    /// Scratch directory with `~` expanded; the system temp dir when unset
    pub fn temp_dir(&self) -> PathBuf {
        match self.temp_dir.as_deref().filter(|d| !d.is_empty()) {
            Some(dir) => expand_home(dir),
            None => std::env::temp_dir(),
        }
    }

    pub fn s3_bucket(&self) -> &str {
        self.s3_bucket.as_deref().unwrap_or_default()
    }

    pub fn s3_key_prefix(&self) -> &str {
        self.s3_key_prefix.as_deref().unwrap_or_default()
    }

    pub fn flatten_options(&self) -> FlattenOptions {
        FlattenOptions {
            separator: DEFAULT_SEPARATOR.to_string(),
            max_level: self.flatten_max_level,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self
                .retry_max_attempts
                .unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS)
                .max(1),
            base_delay: Duration::from_secs(
                self.retry_base_delay_secs
                    .unwrap_or(DEFAULT_RETRY_BASE_DELAY_SECS),
            ),
        }
    }

    pub fn upload_concurrency(&self) -> usize {
        self.upload_concurrency
            .unwrap_or(DEFAULT_UPLOAD_CONCURRENCY)
            .max(1)
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn single_byte(value: &Option<String>, default: &str) -> u8 {
    value
        .as_deref()
        .filter(|v| v.len() == 1)
        .unwrap_or(default)
        .as_bytes()[0]
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn minimal() -> TargetConfig {
        serde_json::from_str(
            r#"{
                "aws_access_key_id": "dummy-value",
                "aws_secret_access_key": "dummy-value",
                "s3_bucket": "dummy-value"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_config_is_invalid() {
        let config: TargetConfig = serde_json::from_str("{}").unwrap();
        let errors = config.validate();
        assert!(!errors.is_empty());
        assert!(errors.iter().any(|e| e.contains("s3_bucket")));
        assert!(matches!(
            config.ensure_valid(),
            Err(TargetError::ConfigurationInvalid(_))
        ));
    }

    #[test]
    fn test_minimal_config_is_valid() {
        assert!(minimal().validate().is_empty());
    }

    #[test]
    fn test_profile_replaces_keys() {
        let config: TargetConfig =
            serde_json::from_str(r#"{"s3_bucket": "b", "aws_profile": "analytics"}"#).unwrap();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_delimiter_must_be_single_byte() {
        let mut config = minimal();
        config.delimiter = Some("||".to_string());
        assert_eq!(config.validate().len(), 1);

        config.delimiter = Some("|".to_string());
        assert!(config.validate().is_empty());
        assert_eq!(config.delimiter(), b'|');
    }

    #[test]
    fn test_defaults() {
        let config = minimal();
        assert_eq!(config.delimiter(), b',');
        assert_eq!(config.quotechar(), b'"');
        assert_eq!(config.s3_key_prefix(), "");
        assert_eq!(config.upload_concurrency(), 1);
        assert_eq!(config.retry_policy().max_attempts, 5);
        assert_eq!(config.retry_policy().base_delay, Duration::from_secs(10));
        assert_eq!(config.temp_dir(), std::env::temp_dir());
        assert!(config.flatten_options().max_level.is_none());
    }

    #[test]
    fn test_home_expansion() {
        let mut config = minimal();
        config.temp_dir = Some("~/scratch".to_string());
        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.temp_dir(), home.join("scratch"));
        }
    }

    #[test]
    fn test_from_file_ignores_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"s3_bucket": "b", "aws_profile": "p", "compression": "gzip", "unrelated": 1}"#,
        )
        .unwrap();

        let config = TargetConfig::from_file(&path).unwrap();
        assert_eq!(config.s3_bucket(), "b");
        assert_eq!(config.compression.as_deref(), Some("gzip"));
    }
}

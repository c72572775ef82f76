//! Retry with exponential backoff for transfers

use super::TransferError;
use crate::error::{Result, TargetError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded exponential backoff: `base_delay * 2^(attempt - 1)` between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Run `operation` until it succeeds, fails fatally, or the attempts run out
///
/// Only [`TransferError::Transient`] failures are retried. The last transient
/// failure is escalated to [`TargetError::TransientTransfer`].
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, key: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, TransferError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(TransferError::Fatal(reason)) => {
                return Err(TargetError::Transfer {
                    key: key.to_string(),
                    reason,
                });
            },
            Err(TransferError::Transient(reason)) if attempt >= max_attempts => {
                return Err(TargetError::TransientTransfer {
                    key: key.to_string(),
                    attempts: attempt,
                    reason,
                });
            },
            Err(TransferError::Transient(reason)) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    key,
                    attempt,
                    max_attempts,
                    delay_secs = delay.as_secs_f64(),
                    error = %reason,
                    "Error detected communicating with the object store, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
        }
    }
}

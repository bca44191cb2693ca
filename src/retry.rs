//! Bounded retries with exponential backoff for external calls.
//!
//! Every call to the record store, the vector index or the embedding
//! provider goes through [`retry`], which bounds each attempt with a
//! timeout and retries only errors that [`Error::is_retryable`] accepts.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default number of attempts per call (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default per-attempt timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Retry and timeout policy for one class of external calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per call, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Cap for the exponential delay
    pub max_delay_ms: u64,
    /// Deadline for a single attempt
    pub timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl RetryConfig {
    /// A single attempt with the given timeout.
    pub fn no_retry(timeout_ms: u64) -> Self {
        Self {
            max_attempts: 1,
            timeout_ms,
            ..Default::default()
        }
    }

    /// Same backoff, different per-attempt deadline.
    pub fn with_timeout_ms(&self, timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            ..self.clone()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay after `failures` failed attempts (exponential backoff).
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u64.saturating_pow(failures - 1);
        let delay = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config("retry.timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Run `fut` with a deadline, mapping expiry to [`Error::Timeout`].
pub async fn with_timeout<T, F>(operation: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            duration_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Run `call` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. Each attempt is bounded by the configured timeout.
pub async fn retry<T, F, Fut>(config: &RetryConfig, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut failures = 0;

    loop {
        match with_timeout(operation, config.timeout(), call()).await {
            Ok(value) => {
                if failures > 0 {
                    debug!(operation, failures, "call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && failures + 1 < attempts => {
                failures += 1;
                let delay = config.delay_for(failures);
                warn!(
                    operation,
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

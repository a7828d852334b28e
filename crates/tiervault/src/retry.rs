//! Retry logic with exponential backoff for backend persistence.
//!
//! Only transient backend failures are retried. Quota, validation and crypto
//! failures fail on the first attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first (default: 3).
    pub max_attempts: u32,
    /// Backoff before the second attempt (default: 50ms).
    pub initial_backoff: Duration,
    /// Backoff ceiling (default: 2 seconds).
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff (default: 2.0).
    pub backoff_multiplier: f64,
    /// Whether to add random jitter to backoff (default: true).
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    /// Operation succeeded.
    Success {
        /// Returned value.
        value: T,
        /// Attempts it took.
        attempts: u32,
    },
    /// Gave up.
    Exhausted {
        /// The last error that occurred.
        last_error: StorageError,
        /// Total number of attempts made.
        attempts: u32,
    },
}

impl<T> RetryOutcome<T> {
    /// Collapse into a plain result, keeping the last error.
    pub fn into_result(self) -> StorageResult<T> {
        match self {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
        }
    }
}

/// Executor for retried operations.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new RetryExecutor with the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` up to the configured attempt budget.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        self.execute_with_attempts(self.config.max_attempts, operation)
            .await
    }

    /// Run `operation` up to `max_attempts` times (at least once).
    ///
    /// Permanent errors fail immediately.
    pub async fn execute_with_attempts<F, Fut, T>(
        &self,
        max_attempts: u32,
        mut operation: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    return RetryOutcome::Success {
                        value,
                        attempts: attempt,
                    }
                }
                Err(e) if is_retryable(&e) && attempt < max_attempts => {
                    let backoff = self.compute_backoff(attempt - 1);
                    debug!(attempt, ?backoff, error = %e, "transient failure, backing off");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return RetryOutcome::Exhausted {
                        last_error: e,
                        attempts: attempt,
                    }
                }
            }
        }
    }

    /// `initial_backoff * multiplier^attempt`, capped at `max_backoff`, plus up to 50% jitter.
    pub fn compute_backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.config.initial_backoff.as_millis() as f64;
        let max_ms = self.config.max_backoff.as_millis() as f64;
        let computed = base_ms * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = computed.min(max_ms) as u64;

        if self.config.jitter && capped >= 2 {
            let jitter = rand::thread_rng().gen_range(0..capped / 2);
            Duration::from_millis(capped.saturating_add(jitter))
        } else {
            Duration::from_millis(capped)
        }
    }
}

/// Returns true for transient errors that should be retried:
/// backend unavailability and raw I/O failures.
pub fn is_retryable(error: &StorageError) -> bool {
    matches!(
        error,
        StorageError::BackendUnavailable { .. } | StorageError::Io(_)
    )
}

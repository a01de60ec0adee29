//! Caller-side retry with a fixed backoff.
//!
//! The client adapter never retries on its own; stages that tolerate
//! repeated attempts wrap their call in a [`RetryPolicy`]. Every error
//! consumes an attempt, including schema validation failures.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::ForgeConfig;

/// Bounded attempts separated by a fixed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never below 1.
    pub max_attempts: u32,
    /// Wait between two attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Policy used for schema generation.
    pub fn from_config(config: &ForgeConfig) -> Self {
        Self::new(config.schema_max_attempts, config.retry_backoff)
    }

    /// Runs `operation` until it succeeds or the attempts are exhausted.
    ///
    /// The closure receives the 1-based attempt number. The last error is
    /// returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation = label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt < self.max_attempts => {
                    tracing::warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_secs = self.backoff.as_secs_f64(),
                        error = %err,
                        "Attempt failed, will retry"
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        operation = label,
                        attempts = attempt,
                        error = %err,
                        "Giving up after final attempt"
                    );
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(4, Duration::from_secs(15))
    }
}

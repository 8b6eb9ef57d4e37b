//! Retry policy - bounded re-execution of transient store failures
//!
//! Only errors of kind [`ErrorKind::TransientStoreFailure`] are retried.
//! Re-running a transfer is safe because each attempt is one atomic unit: a
//! failed attempt has been rolled back before the next one starts. A unit
//! whose rollback failed is never transient.

use crate::{
    config::RetryConfig,
    error::{Error, ErrorKind, Result},
};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Linear backoff retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Policy with default settings (3 attempts, 100ms × attempt)
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Attempts in total, never less than one
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Delay after failed attempt `attempt` (1-based): `base × attempt`, plus jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay_ms as f64 * attempt as f64;

        let jitter_range = base * self.config.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            (rand::random::<f64>() - 0.5) * jitter_range * 2.0
        } else {
            0.0
        };

        Duration::from_millis((base + jitter).max(0.0) as u64)
    }

    /// Whether an error may be retried
    pub fn is_retryable(&self, error: &Error) -> bool {
        error.kind() == ErrorKind::TransientStoreFailure
    }

    /// Execute `operation`, retrying transient failures.
    ///
    /// A retry whose backoff would end after `deadline` is not attempted; the
    /// caller gets `DeadlineExceeded` carrying the last failure instead.
    pub async fn execute<F, Fut, T>(
        &self,
        operation_name: &str,
        deadline: Instant,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;

        loop {
            let err = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempt,
                            max_attempts,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !self.is_retryable(&err) {
                if err.kind() == ErrorKind::InternalStoreError {
                    tracing::error!(
                        operation = operation_name,
                        error = %err,
                        "Internal store error"
                    );
                }
                return Err(err);
            }

            if attempt >= max_attempts {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(Error::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.delay_for(attempt);
            if Instant::now() + delay >= deadline {
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "No time left for another attempt"
                );
                return Err(Error::DeadlineExceeded(format!(
                    "{} gave up after {} attempts: {}",
                    operation_name, attempt, err
                )));
            }

            warn!(
                operation = operation_name,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_defaults()
    }
}

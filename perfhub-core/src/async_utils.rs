//! Async utilities and patterns
//!
//! Provides retry/backoff logic and timeouts shared by the collaborator adapters

use crate::error::{ErrorContext, PerfhubError, PerfhubResult};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, warn};

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, `0` retries forever
    pub max_attempts: usize,
    /// Initial delay between retries in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Backoff multiplier (exponential backoff)
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Whether another attempt is allowed after `attempt` failed attempts
    pub fn allows_attempt(&self, attempt: usize) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based), capped at `max_delay_ms`
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base = (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay_ms as f64);

        let millis = if self.jitter {
            let jitter_factor = 0.1;
            let jitter = (fastrand::f64() - 0.5) * 2.0 * jitter_factor;
            capped * (1.0 + jitter)
        } else {
            capped
        };

        Duration::from_millis(millis.max(0.0) as u64)
    }
}

/// Retry an async operation with exponential backoff
///
/// Only errors with a [`PerfhubError::retry_delay_ms`] hint are retried, and
/// never sooner than that hint allows (still capped at `max_delay_ms`). Any
/// other error is returned at once.
pub async fn retry_async<F, T>(
    operation: F,
    config: RetryConfig,
    operation_name: &str,
) -> PerfhubResult<T>
where
    F: Fn() -> BoxFuture<'static, PerfhubResult<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        debug!(
            operation = operation_name,
            attempt = attempt,
            max_attempts = config.max_attempts,
            "Attempting operation"
        );

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                let Some(hint_ms) = error.retry_delay_ms() else {
                    debug!(
                        operation = operation_name,
                        error = %error,
                        "Operation failed with a non-retryable error"
                    );
                    return Err(error);
                };

                if !config.allows_attempt(attempt) {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        error = %error,
                        "Operation failed after all retry attempts"
                    );
                    return Err(error);
                }

                let delay = config
                    .delay_for_attempt(attempt)
                    .max(Duration::from_millis(hint_ms))
                    .min(Duration::from_millis(config.max_delay_ms));
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                sleep(delay).await;
            }
        }
    }
}

/// Timeout wrapper for async operations
pub async fn with_timeout<F, T>(future: F, timeout_ms: u64, operation_name: &str) -> PerfhubResult<T>
where
    F: std::future::Future<Output = T>,
{
    match timeout(Duration::from_millis(timeout_ms), future).await {
        Ok(result) => Ok(result),
        Err(_) => Err(PerfhubError::Timeout {
            operation: operation_name.to_string(),
            duration_ms: timeout_ms,
            context: ErrorContext::new("async_utils")
                .with_operation("timeout")
                .with_metadata("timeout_ms", &timeout_ms.to_string())
                .with_suggestion("Increase timeout duration")
                .with_suggestion("Check network connectivity"),
        }),
    }
}

//! Retry logic with exponential backoff
//!
//! Used by the Redis store adapter for transient connection failures:
//! base delay 1s, factor 2, capped attempts.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (first try included)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum attempts
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set initial delay
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Calculate delay for a given attempt number (1-based)
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32 - 1);
        Duration::from_millis(base.min(self.max_delay.as_millis() as f64) as u64)
    }
}

/// Error returned when all attempts are exhausted
#[derive(Debug)]
pub struct RetryError<E> {
    /// The last error encountered
    pub last_error: E,
    /// Total number of attempts made
    pub attempts: u32,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "operation failed after {} attempts: {}",
            self.attempts, self.last_error
        )
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

/// Execute an async operation with retry on retryable errors.
///
/// `is_retryable` decides whether a given error is worth another attempt;
/// non-retryable errors are returned immediately.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    config: &RetryConfig,
    mut operation: F,
    is_retryable: R,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Debug,
{
    for attempt in 1..=config.max_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt = attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                let should_retry = attempt < config.max_attempts && is_retryable(&e);
                if should_retry {
                    let delay = config.calculate_delay(attempt);
                    warn!(
                        attempt = attempt,
                        max_attempts = config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = ?e,
                        "operation failed, retrying"
                    );
                    sleep(delay).await;
                } else {
                    return Err(RetryError {
                        last_error: e,
                        attempts: attempt,
                    });
                }
            }
        }
    }

    unreachable!("retry loop always returns from the error branch")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_growth() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.calculate_delay(1), Duration::from_secs(1));
        assert_eq!(config.calculate_delay(2), Duration::from_secs(2));
        assert_eq!(config.calculate_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.calculate_delay(9), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(
            &config,
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_returns_immediately() {
        let config = RetryConfig::new().with_initial_delay(Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(
            &config,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("fatal")
            },
            |_| false,
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let config = RetryConfig::new()
            .with_max_attempts(4)
            .with_initial_delay(Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(
            &config,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("transient")
            },
            |_| true,
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}

//! Retry logic for durable transport operations.

use std::time::Duration;

use crate::{Error, Result};

/// Configuration for retry behavior on failed operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 means no retries)
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            ..Self::default()
        }
    }

    /// Create a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Set the maximum backoff duration.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Calculate the backoff duration for a given attempt number.
    fn backoff(&self, attempt: u32) -> Duration {
        let millis = (self.initial_backoff.as_millis() as f64)
            * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(millis as u64).min(self.max_backoff)
    }

    /// Retry an async operation while it fails with a retryable error.
    ///
    /// Non-retryable errors are returned immediately; the last error is
    /// returned once all attempts are exhausted.
    pub async fn retry<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() || attempt >= self.max_attempts => {
                    return Err(err);
                }
                Err(err) => {
                    let backoff = self.backoff(attempt);
                    tracing::debug!(
                        target: crate::TRACING_TARGET_CONNECTION,
                        error = %err,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff.as_millis(),
                        "Retrying operation after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Builds a retryable delivery error for a failed publish.
pub(crate) fn publish_failed(subject: &str, err: impl std::fmt::Display) -> Error {
    Error::delivery_failed(subject, err.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let config = RetryConfig::new(5, Duration::from_millis(100))
            .with_max_backoff(Duration::from_millis(300));
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(2), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_then_surfaces_them() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::new(2, Duration::from_millis(10));

        let counter = calls.clone();
        let result: Result<()> = config
            .retry(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::delivery_failed("duet.control", "broker down"))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::DeliveryFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fails_fast_on_permanent_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = RetryConfig::default()
            .retry(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::unknown_job("render"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

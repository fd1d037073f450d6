//! Bounded retry with exponential backoff
//!
//! Used for forum fetches and login attempts. The backoff carries the
//! `backoff` crate's randomization, so concurrent retries spread out.

use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use tracing::warn;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_interval: Duration,
    /// Maximum backoff duration
    pub max_interval: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Create an ExponentialBackoff from this config
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        }
    }
}

/// Run `operation` until it succeeds, `retryable` rejects the error, or the
/// attempts run out. The last error is returned.
pub async fn retry_async<T, E, Fut, F, R>(
    operation: F,
    retryable: R,
    config: &RetryConfig,
    operation_name: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempts = 0;
    let mut backoff = config.to_backoff();

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !retryable(&e) {
                    return Err(e);
                }
                if attempts >= config.max_attempts {
                    warn!(
                        operation = %operation_name,
                        attempts = attempts,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                match backoff.next_backoff() {
                    Some(duration) => {
                        warn!(
                            operation = %operation_name,
                            attempt = attempts,
                            error = %e,
                            retry_in_ms = duration.as_millis() as u64,
                            "Operation failed, retrying"
                        );
                        tokio::time::sleep(duration).await;
                    }
                    None => return Err(e),
                }
            }
        }
    }
}

//! Retry Logic and Error Resilience
//!
//! Exponential backoff with jitter for transient failures. Used by the
//! orchestrator around LLM provider calls; MCP connections do not retry on
//! their own.
//!
//! # Example
//!
//! ```ignore
//! let config = RetryConfig::default()
//!     .max_attempts(3)
//!     .base_delay(Duration::from_millis(100));
//!
//! let reply = retry_with_backoff(&config, ProviderError::is_retryable, || async {
//!     provider.complete(request.clone()).await
//! }).await?;
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry configuration
///
/// # Fields
///
/// * `max_attempts` - Total attempts including the first (default: 3)
/// * `base_delay` - Delay before the first retry (default: 500ms)
/// * `max_delay` - Cap on any single delay (default: 8s)
/// * `jitter` - Random delay variation factor (default: 0.1 = 10%)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter factor, clamped to `0.0..=1.0`
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `retry` (0-based).
    ///
    /// `base_delay * 2^retry`, plus up to `jitter` of that, capped at
    /// `max_delay`.
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry.min(31));
        let exponential_delay = self.base_delay.saturating_mul(factor);

        let jitter_range = exponential_delay.mul_f64(self.jitter.clamp(0.0, 1.0));
        let jitter_offset = jitter_range.mul_f64(rand::random::<f64>());
        let jittered_delay = exponential_delay.saturating_add(jitter_offset);

        jittered_delay.min(self.max_delay)
    }
}

/// Retry an operation with exponential backoff
///
/// Runs `operation` up to `max_attempts` times (at least once). Errors for
/// which `is_retryable` is false are returned immediately.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    config: &RetryConfig,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if attempt < attempts && is_retryable(&e) => {
                let delay = config.calculate_delay(attempt - 1);
                tracing::warn!(attempt, error = %e, ?delay, "attempt failed, retrying");
                sleep(delay).await;
            }
            Err(e) => {
                tracing::error!(attempt, error = %e, "operation failed");
                return Err(e);
            }
        }
    }
}

//! Backoff-retry around external model calls
//!
//! This is the only retry mechanism in the pipeline. Delays follow a
//! bounded exponential schedule with random jitter; only errors that
//! `AppError::is_retryable` classifies as transient are retried.

use crate::config::RetryConfig;
use crate::errors::Result;
use crate::metrics;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule for retried calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total invocations including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Fraction of the exponential delay added as random jitter.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
            multiplier: config.multiplier,
            max_delay_ms: config.max_delay_ms,
            jitter_ratio: config.jitter_ratio,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), given a jitter sample
    /// in `[0, 1)`.
    ///
    /// `min(base * multiplier^attempt * (1 + jitter_ratio * jitter), max_delay)`
    pub fn delay_for_attempt(&self, attempt: u32, jitter: f64) -> Duration {
        let jitter = jitter.clamp(0.0, 1.0);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let exponential = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let jittered = exponential * (1.0 + self.jitter_ratio * jitter);

        let capped = jittered.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Worst-case time spent sleeping across all retries.
    pub fn max_total_delay(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for_attempt(attempt, 1.0))
            .sum()
    }
}

/// Run `action`, retrying transient failures according to `policy`.
///
/// Non-retryable errors are returned on first occurrence. When attempts
/// run out the last error is returned unchanged.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut action: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        match action().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation, attempts = attempt + 1, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                attempt += 1;

                if !e.is_retryable() || attempt >= max_attempts {
                    return Err(e);
                }

                let delay = policy.delay_for_attempt(attempt - 1, rand::random::<f64>());
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient model error, retrying"
                );
                metrics::record_retry(operation);

                tokio::time::sleep(delay).await;
            }
        }
    }
}

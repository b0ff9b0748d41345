//! Retry policy for transient backend failures
//!
//! Bounded attempts with binary exponential backoff and optional ±25%
//! jitter. Only errors that report [`crate::StoreError::is_retryable`] are retried;
//! everything else is returned on the first failure.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::Result;

/// Centralized retry policy used by the facade for every operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Build from configuration
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation`, retrying retryable failures with backoff
    pub fn run<T, F>(&self, operation: &'static str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 1;
        loop {
            match attempt_fn() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::debug!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after lock contention: {}",
                        err
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::warn!(
                            operation,
                            attempts = attempt,
                            "lock contention persisted, giving up: {}",
                            err
                        );
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let nominal = self
            .base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay);

        if !self.jitter || nominal.is_zero() {
            return nominal;
        }
        let factor = 0.75 + rand::random::<f64>() * 0.5;
        nominal.mul_f64(factor).min(self.max_delay)
    }

    /// Worst-case time spent sleeping across all retries
    pub fn max_total_delay(&self) -> Duration {
        let nominal: Duration = (1..self.max_attempts)
            .map(|attempt| {
                self.base_delay
                    .saturating_mul(2u32.pow(attempt.saturating_sub(1).min(20)))
                    .min(self.max_delay)
            })
            .sum();
        if self.jitter {
            nominal.mul_f64(1.25)
        } else {
            nominal
        }
    }
}

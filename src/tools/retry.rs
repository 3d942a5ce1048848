//! Retry executor with exponential backoff
//!
//! Bounded retry strategy:
//! - Attempts: `max_attempts` total, first try included
//! - Backoff: initial delay × multiplier per retry, capped, optional ±25% jitter
//! - Scope: all attempts share one `CallScope`; once it ends the executor
//!   stops at once and reports the cancellation cause
//! - Errors: the last attempt's error is returned; a timeout or cancellation
//!   the handler reports while the scope is still live counts as a failure

use crate::errors::{Result, ToolError};
use crate::tools::timeout::CallScope;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Default attempts per call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default first backoff delay (200ms)
const DEFAULT_INITIAL_DELAY_MS: u64 = 200;

/// Default delay cap (5 seconds)
const DEFAULT_MAX_DELAY_MS: u64 = 5000;

/// Default growth factor between retries
const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    max_attempts: u32,

    /// Delay before the first retry
    initial_delay: Duration,

    /// Factor applied per further retry
    multiplier: f64,

    /// Upper bound on any single delay
    max_delay: Duration,

    /// Enable jitter
    enable_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            enable_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with custom attempt count and first delay
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            ..Default::default()
        }
    }

    /// Single attempt, never retry
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, enable: bool) -> Self {
        self.enable_jitter = enable;
        self
    }

    /// Run `operation` until it succeeds, fails permanently, runs out of
    /// attempts, or `scope` ends
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn run<F, Fut, T>(&self, scope: &CallScope, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            if !scope.is_active() {
                return Err(scope.cause());
            }

            let outcome = tokio::select! {
                biased;
                cause = scope.expired() => return Err(cause),
                outcome = operation(attempt) => outcome,
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            // Only the scope decides timeout vs cancellation; a handler's own
            // timeout or cancellation while the scope is live is a plain failure
            let err = if err.is_cancellation() {
                if !scope.is_active() {
                    return Err(scope.cause());
                }
                ToolError::Execution(err.to_string())
            } else {
                err
            };

            if !err.is_retryable() || attempt >= self.max_attempts {
                return Err(err);
            }

            let delay = self.calculate_delay(attempt);
            tracing::debug!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after failure"
            );

            tokio::select! {
                biased;
                cause = scope.expired() => return Err(cause),
                _ = sleep(delay) => {}
            }
        }
    }

    /// Delay after the `retry`-th failure (1-based)
    fn calculate_delay(&self, retry: u32) -> Duration {
        let delay_ms = self.capped_backoff(retry).as_millis() as u64;

        // Add jitter if enabled (±25% random variation)
        let final_delay = if self.enable_jitter {
            let jitter = (delay_ms / 4) as i64;
            let random_jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter as f64;
            ((delay_ms as i64) + random_jitter as i64).max(0) as u64
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }

    /// Upper bound on total backoff across all retries, jitter excluded
    pub fn max_total_wait_time(&self) -> Duration {
        (1..self.max_attempts)
            .map(|retry| self.capped_backoff(retry))
            .sum()
    }

    /// Exponential delay for the `retry`-th failure, capped at `max_delay`
    fn capped_backoff(&self, retry: u32) -> Duration {
        // 0 × inf is NaN once the multiplier overflows
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let exponential_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(exponential_ms.min(self.max_delay.as_millis() as f64) as u64)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

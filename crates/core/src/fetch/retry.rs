//! Bounded retry with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use barsync_market_data::{RetryClass, Retryable};

use crate::clock::Sleeper;
use crate::config::RetryConfig;

/// How an operation is retried.
///
/// Attempt `n` (1-based) that fails with a backoff-class error waits
/// `min(base_delay * multiplier^(n-1), max_delay)`; a rate-limited attempt
/// waits `rate_limit_cooldown` instead. Never-class errors end the loop
/// immediately.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    rate_limit_cooldown: Duration,
    sleeper: Arc<dyn Sleeper>,
}

/// The error that ended a retry loop, with how far the loop got.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
    pub last_class: RetryClass,
}

impl<E> RetryFailure<E> {
    /// True when the loop stopped because it ran out of attempts rather than
    /// on a terminal error.
    pub fn exhausted(&self) -> bool {
        self.last_class != RetryClass::Never
    }
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            rate_limit_cooldown: Duration::from_millis(config.rate_limit_cooldown_ms),
            sleeper,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after the `failed_attempt`-th failure (1-based).
    pub fn backoff_delay(&self, failed_attempt: u32) -> Duration {
        let exponent = i32::try_from(failed_attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Runs `op` until it succeeds, fails terminally, or attempts run out.
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryFailure<E>>
    where
        E: Retryable + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded after {} attempts", label, attempt);
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let class = error.retry_class();
                    if class == RetryClass::Never || attempt >= self.max_attempts {
                        return Err(RetryFailure {
                            error,
                            attempts: attempt,
                            last_class: class,
                        });
                    }

                    let delay = match class {
                        RetryClass::Cooldown => self.rate_limit_cooldown,
                        _ => self.backoff_delay(attempt),
                    };
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        label, attempt, self.max_attempts, error, delay
                    );
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }
}

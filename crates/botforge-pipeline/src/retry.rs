//! Bounded retry with exponential backoff, per-attempt timeout and cancellation.

use botforge_core::settings::RetryConfig;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Errors a [`RetryPolicy`] knows how to classify.
pub trait Retryable: Sized {
    fn is_retryable(&self) -> bool;
    fn timed_out(after: Duration) -> Self;
    fn cancelled() -> Self;
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            attempt_timeout: config.attempt_timeout(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `attempt + 1`; doubles up to 2^5 times the base.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.pow(attempt.min(5));
        self.base_delay.saturating_mul(multiplier)
    }

    /// Run `op` until it succeeds, fails fatally, runs out of attempts, or is cancelled.
    /// Returns the outcome together with the number of attempts made.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> (Result<T, E>, u32)
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempts = 0;
        loop {
            if cancel.is_cancelled() {
                return (Err(E::cancelled()), attempts);
            }
            let attempt = attempts;
            attempts += 1;

            let outcome = tokio::select! {
                r = tokio::time::timeout(self.attempt_timeout, op(attempt)) => match r {
                    Ok(result) => result,
                    Err(_) => Err(E::timed_out(self.attempt_timeout)),
                },
                _ = cancel.cancelled() => return (Err(E::cancelled()), attempts),
            };

            let err = match outcome {
                Ok(value) => return (Ok(value), attempts),
                Err(e) => e,
            };
            if !err.is_retryable() || attempt >= self.max_retries {
                return (Err(err), attempts);
            }

            let delay = self.backoff_delay(attempt);
            warn!(label, attempt = attempts, error = %err, delay_ms = delay.as_millis() as u64, "attempt failed, retrying");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return (Err(E::cancelled()), attempts),
            }
        }
    }
}

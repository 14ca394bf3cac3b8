//! Bounded retry with exponential backoff
//!
//! Attempt `k` (0-based) that fails with a transient error waits
//! `base_delay * 2^k`, plus up to 25% random jitter when enabled, before the
//! next attempt. Non-transient errors are returned immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::error::ChainError;

const MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    jitter: bool,
}

impl RetryPolicy {
    /// `max_attempts` is the total number of calls, clamped to at least one
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter: false,
        }
    }

    /// A policy that calls exactly once
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deterministic part of the delay after failed attempt `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    /// Delay actually slept after failed attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if !self.jitter || backoff.is_zero() {
            return backoff;
        }
        let max_jitter_ms = (backoff.as_millis() / 4) as u64;
        let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
        backoff + Duration::from_millis(jitter_ms)
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt budget is spent.
    ///
    /// `op` receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, ChainError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let mut attempt = 0u32;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            if attempt + 1 >= self.max_attempts {
                warn!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts = self.max_attempts,
                    error = %err,
                    "Chain call failed, retry budget exhausted"
                );
                return Err(ChainError::RetriesExhausted {
                    attempts: self.max_attempts,
                    last: Box::new(err),
                });
            }

            let delay = self.delay_for(attempt);
            warn!(
                operation,
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Chain call failed, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

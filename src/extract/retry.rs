//! Bounded exponential-backoff retry around remote collaborator calls.
//!
//! A [`RetryPolicy`] is shared by the extraction and segmentation clients. Only errors
//! classified as transient by [`LandwatchError::is_transient`] are retried; any other
//! error is returned at once. After `max_attempts` transient failures the call fails with
//! [`LandwatchError::RetriesExhausted`], carrying the last error message.
//!
//! The delay before attempt `k + 1` is `base_delay * multiplier^(k - 1)`:
//! with the defaults (5 attempts, 1 s, x2) the waits are 1, 2, 4 and 8 seconds.
use std::future::Future;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::landwatch_errors::LandwatchError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: multiplier.max(1.0),
        }
    }

    /// Policy without waiting, for tests and local collaborators.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, 1.0)
    }

    /// Wait inserted after the failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        self.base_delay.mul_f64(self.multiplier.powi(exp))
    }

    /// Run `call` until it succeeds, fails permanently, or the attempts are exhausted.
    ///
    /// Arguments
    /// -----------------
    /// * `operation`: label used in the logs and in the final error (e.g. `"extract cell 12"`).
    /// * `call`: factory producing a fresh future per attempt.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, LandwatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LandwatchError>>,
    {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            debug!(operation, attempt, "Remote call attempt");
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => {
                    warn!(operation, attempt, error = %e, "Remote call failed permanently");
                    return Err(e);
                }
                Err(e) => {
                    warn!(operation, attempt, error = %e, "Transient remote failure");
                    last_error = e.to_string();
                }
            }

            if attempt < self.max_attempts {
                let backoff = self.delay_after(attempt);
                trace!(backoff_ms = backoff.as_millis() as u64, "Backoff before retry");
                tokio::time::sleep(backoff).await;
            }
        }

        Err(LandwatchError::RetriesExhausted {
            operation: operation.to_string(),
            attempts: self.max_attempts,
            last_error,
        })
    }
}

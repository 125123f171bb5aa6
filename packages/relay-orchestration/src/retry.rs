use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

/// Re-invocation budget of a bus rule target
///
/// One initial attempt plus up to `retry_attempts` retries, with exponential
/// backoff (`base_backoff * 2^n` before retry `n`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn new(retry_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            retry_attempts,
            base_backoff,
        }
    }

    /// Policy that never re-invokes
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_invocations(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }

    /// Delay before retry number `retry` (0-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_backoff.saturating_mul(factor)
    }

    /// Run `op` until it succeeds or the budget is spent
    ///
    /// `op` receives the 0-based attempt number. The last error is returned
    /// when every attempt failed.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.retry_attempts => {
                    let delay = self.backoff_for(attempt);
                    warn!(
                        attempt,
                        remaining = self.retry_attempts - attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "invocation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "retry budget exhausted");
                    return Err(e);
                }
            }
        }
    }
}

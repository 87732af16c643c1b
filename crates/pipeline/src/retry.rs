//! Bounded retry with exponential backoff for the network-bound adapters.

use std::future::Future;
use std::time::Duration;

use docuflow_core::{RetrySettings, StageError};

/// Retries an operation while its error is retriable, sleeping an
/// exponentially growing backoff between attempts. After exhaustion the last
/// error is returned and the caller treats it as non-retriable for that
/// document.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let millis =
            (self.base_delay.as_millis() as f64) * self.multiplier.powi(attempt as i32);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    /// Run `operation`, retrying retriable errors up to `max_attempts` times
    /// after the first try.
    pub async fn run<F, Fut, T>(&self, what: &str, mut operation: F) -> Result<T, StageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retriable() {
                        return Err(err);
                    }
                    last_error = Some(err);
                    if attempt < self.max_attempts {
                        let backoff = self.backoff(attempt);
                        tracing::debug!(
                            what,
                            attempt = attempt + 1,
                            max_attempts = self.max_attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            "retrying after backoff"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        let err = last_error
            .unwrap_or_else(|| StageError::TransientNetwork("retries exhausted".into()));
        tracing::warn!(what, %err, "retries exhausted");
        Err(err)
    }
}

//! Retry with exponential backoff for calls to external providers.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryPolicy;

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub(crate) fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds or `max_attempts` is reached.
    ///
    /// Returns the last error when every attempt fails.
    pub async fn run<F, Fut, T, E>(&self, operation_name: &str, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1u32;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.delay_for_retry(attempt);
                    debug!(
                        operation = operation_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(operation = operation_name, attempts = attempt, error = %e, "giving up");
                    return Err(e);
                }
            }
        }
    }
}

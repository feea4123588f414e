use crate::config::types::HttpConfig;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Errors that can tell whether repeating the same request may succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;

    /// Server-requested delay (e.g. a `Retry-After` header), used as the lower
    /// bound for the next backoff.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Bounded exponential backoff wrapped around a single network call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails with a non-transient error, or
    /// the attempt budget is spent. The last error is returned unchanged.
    pub async fn run<F, Fut, T, E>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempts = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.max_attempts {
                        tracing::error!(
                            operation = operation_name,
                            attempts = attempts,
                            error = %e,
                            "Max retries exceeded"
                        );
                        return Err(e);
                    }

                    let delay = match e.retry_after() {
                        Some(requested) => requested.max(backoff),
                        None => backoff,
                    }
                    .min(self.max_backoff);

                    tracing::warn!(
                        operation = operation_name,
                        attempt = attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );

                    tokio::time::sleep(delay).await;
                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                }
            }
        }
    }
}

impl From<&HttpConfig> for RetryPolicy {
    fn from(config: &HttpConfig) -> Self {
        Self::new(config.max_attempts, config.initial_backoff, config.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&HttpConfig::default())
    }
}

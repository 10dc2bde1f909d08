// Bounded retry with exponential backoff
// Shared by the blocking HTTP providers and the async index store

#[cfg(test)]
mod tests;

use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use tracing::{debug, error, warn};

use crate::IntentCacheError;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    #[inline]
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Delay before the attempt following `attempt` (1-based)
    #[inline]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Build a blocking HTTP agent with a global request timeout
#[inline]
pub fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Run a blocking HTTP request, retrying server and transport errors.
///
/// Client errors (4xx) fail immediately.
#[inline]
pub fn send_with_retry<F>(
    policy: &RetryPolicy,
    target: &str,
    mut request_fn: F,
) -> anyhow::Result<String>
where
    F: FnMut() -> Result<String, ureq::Error>,
{
    let mut last_error = None;

    for attempt in 1..=policy.attempts {
        debug!("HTTP request attempt {}/{}", attempt, policy.attempts);

        match request_fn() {
            Ok(response_text) => {
                debug!("Request succeeded on attempt {}", attempt);
                return Ok(response_text);
            }
            Err(error) => {
                let should_retry = match &error {
                    ureq::Error::StatusCode(status) => {
                        if *status >= 500 {
                            warn!(
                                "Server error (status {}), attempt {}/{}",
                                status, attempt, policy.attempts
                            );
                            true
                        } else {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(anyhow!("Client error: HTTP {}", status));
                        }
                    }
                    ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_) => {
                        warn!(
                            "Transport error: {}, attempt {}/{}",
                            error, attempt, policy.attempts
                        );
                        true
                    }
                    _ => {
                        warn!("Non-retryable error: {}", error);
                        false
                    }
                };

                if !should_retry {
                    return Err(anyhow!("Non-retryable error: {}", error));
                }

                last_error = Some(anyhow!("Request error: {}", error));

                if attempt < policy.attempts {
                    let delay = policy.delay_after(attempt);
                    debug!("Waiting {:?} before retry", delay);
                    std::thread::sleep(delay);
                }
            }
        }
    }

    error!("All retry attempts failed for request to {}", target);

    Err(last_error.unwrap_or_else(|| anyhow!("Request failed after retries")))
}

/// Run an async index operation, retrying only errors that report
/// themselves as retryable. Exhausted retries surface the last error.
#[inline]
pub async fn retry_async<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, IntentCacheError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, IntentCacheError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation, attempt, policy.attempts, err, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    error!(
                        "{} failed after {} attempts: {}",
                        operation, policy.attempts, err
                    );
                }
                return Err(err);
            }
        }
    }
}

//! Bounded retry with exponential backoff and a per-attempt timeout.
//!
//! Used by every remote capability (embedding, generation). Each attempt
//! runs under `timeout`; transient failures and timeouts are retried up to
//! `max_retries` times with a delay of `backoff_base × 2^(attempt-1)`,
//! capped at `2^5 × backoff_base`. Permanent failures return immediately.
//!
//! When retries run out, the last failure decides the error: a timeout
//! surfaces as [`Error::Timeout`], anything else through the caller's
//! `unavailable` constructor (e.g. [`Error::EmbeddingUnavailable`]).

use std::future::Future;
use std::time::Duration;

use docent_core::{Error, Result};

/// Outcome of one failed attempt.
#[derive(Debug)]
pub enum AttemptError {
    /// Worth retrying: network errors, HTTP 429, HTTP 5xx.
    Transient(String),
    /// Not worth retrying: bad request, authentication, malformed response.
    Permanent(Error),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base_ms: u64, timeout_secs: u64) -> Self {
        Self {
            max_retries,
            backoff_base: Duration::from_millis(backoff_base_ms),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * (1u32 << (attempt.saturating_sub(1)).min(5))
    }

    /// Run `f` until it succeeds, fails permanently, or exhausts retries.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        unavailable: fn(String) -> Error,
        mut f: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, AttemptError>>,
    {
        let mut last_timed_out = false;
        let mut last_message = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_message,
                    "retrying remote call"
                );
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(self.timeout, f()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(AttemptError::Permanent(err))) => return Err(err),
                Ok(Err(AttemptError::Transient(message))) => {
                    last_timed_out = false;
                    last_message = message;
                }
                Err(_) => {
                    last_timed_out = true;
                    last_message = format!("timed out after {}ms", self.timeout.as_millis());
                }
            }
        }

        tracing::error!(operation, error = %last_message, "remote call failed after retries");
        if last_timed_out {
            Err(Error::Timeout {
                operation: operation.to_string(),
                after_ms: self.timeout.as_millis() as u64,
            })
        } else {
            Err(unavailable(format!(
                "{} failed after {} attempts: {}",
                operation,
                self.max_retries + 1,
                last_message
            )))
        }
    }
}

/// Classify an HTTP status: 429 and 5xx are transient, other failures are
/// permanent.
pub fn classify_status(
    status: reqwest::StatusCode,
    body: String,
    unavailable: fn(String) -> Error,
) -> AttemptError {
    let message = format!("HTTP {}: {}", status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        AttemptError::Transient(message)
    } else {
        AttemptError::Permanent(unavailable(message))
    }
}

//! Bounded retry with exponential backoff for completion requests.
//!
//! Transient failures (429, 5xx, timeouts, refused connections) are retried
//! up to `max_retries` times. The wait before retry `n` (0-based) is
//! `initial_backoff * backoff_factor^n`, replaced by the server's
//! `Retry-After` when one was sent, and capped at `max_backoff`. Any other
//! failure is returned at once.

use std::time::Duration;

use crate::llm::{CompletionBackend, LlmError};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub backoff_factor: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (0-based), ignoring any server hint.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_factor.powi(exp);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// The wait to use after `error` on attempt `attempt`.
    pub fn wait_after(&self, error: &LlmError, attempt: u32) -> Duration {
        error
            .retry_after()
            .unwrap_or_else(|| self.delay_for(attempt))
            .min(self.max_backoff)
    }
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP-dates get a conservative fixed wait instead of a clock comparison.
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

/// The `Retry-After` hint of a response, if present and parseable.
pub fn retry_after_from(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

/// Result of [`complete_with_retry`].
#[derive(Debug)]
pub struct RetryOutcome {
    pub result: Result<String, LlmError>,
    /// Requests made, including the first.
    pub attempts: u32,
}

impl RetryOutcome {
    pub fn ok(&self) -> Option<&str> {
        self.result.as_deref().ok()
    }
}

/// Ask `backend`, retrying transient failures according to `policy`.
pub async fn complete_with_retry(
    backend: &dyn CompletionBackend,
    context: &str,
    question: &str,
    policy: &RetryPolicy,
) -> RetryOutcome {
    let mut attempt: u32 = 0;
    loop {
        let result = backend.complete(context, question).await;
        let err = match result {
            Ok(text) => {
                return RetryOutcome {
                    result: Ok(text),
                    attempts: attempt + 1,
                };
            }
            Err(e) => e,
        };

        if !err.is_transient() || attempt >= policy.max_retries {
            tracing::warn!(backend = backend.name(), attempts = attempt + 1, error = %err, "completion failed");
            return RetryOutcome {
                result: Err(err),
                attempts: attempt + 1,
            };
        }

        let wait = policy.wait_after(&err, attempt);
        tracing::info!(
            backend = backend.name(),
            retry = attempt + 1,
            max_retries = policy.max_retries,
            wait_secs = wait.as_secs_f64(),
            error = %err,
            "transient completion error, backing off"
        );
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}

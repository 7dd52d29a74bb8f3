//! Resilient wrapper for every outbound call (search, page fetch, completion).
//!
//! Providers classify their own failures into a [`Failure`]; [`call`] applies the
//! timeout, the retry budget and the backoff schedule, and hands back a
//! [`CallError`] once the budget is spent. Nothing here knows about the workflow.

use std::future::Future;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The server asked us to back off.
    RateLimited,
    /// Network trouble, timeouts and 5xx responses.
    Transient,
    /// Client errors and malformed responses. Never retried.
    Permanent,
}

impl FailureClass {
    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureClass::Permanent)
    }
}

/// One failed attempt, as classified by the provider that made it.
#[derive(Debug, Clone, Error)]
#[error("{class:?}: {message}")]
pub struct Failure {
    pub class: FailureClass,
    pub message: String,
    /// Backoff hint sent by the server (e.g. `Retry-After`).
    pub retry_after: Option<Duration>,
}

impl Failure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Permanent,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            class: FailureClass::RateLimited,
            message: message.into(),
            retry_after,
        }
    }

    /// Map a non-success HTTP status onto the failure taxonomy.
    pub fn from_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        let message = if snippet.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, snippet)
        };

        if status == StatusCode::TOO_MANY_REQUESTS {
            Self::rate_limited(message, retry_after)
        } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            Self::transient(message)
        } else {
            Self::permanent(message)
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::permanent(format!("malformed response: {}", err));
        }
        match err.status() {
            Some(status) => Self::from_status(status, None, ""),
            None => Self::transient(err.to_string()),
        }
    }
}

/// Read a `Retry-After` header expressed in seconds.
pub fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// The budget was spent (or the failure was permanent). Callers treat this as data.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed after {attempts} attempt(s) in {elapsed:?}: {last}")]
pub struct CallError {
    pub operation: String,
    pub attempts: u32,
    pub elapsed: Duration,
    #[source]
    pub last: Failure,
}

impl CallError {
    pub fn class(&self) -> FailureClass {
        self.last.class
    }
}

#[derive(Debug, Clone)]
pub struct CallBudget {
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles each retry.
    pub base_delay: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Default for CallBudget {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

impl CallBudget {
    /// `base * 2^(attempt-1)` for the 1-based attempt that just failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Delay before the next attempt. A rate-limit hint wins over the schedule
    /// but never exceeds the per-attempt timeout.
    pub fn retry_delay(&self, attempt: u32, failure: &Failure) -> Duration {
        match (failure.class, failure.retry_after) {
            (FailureClass::RateLimited, Some(hint)) => hint.min(self.timeout),
            _ => self.backoff(attempt),
        }
    }
}

/// Run `attempt_fn` under `budget`, retrying retryable failures with backoff.
pub async fn call<T, F, Fut>(
    operation: &str,
    budget: &CallBudget,
    mut attempt_fn: F,
) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let started = Instant::now();
    let max_attempts = budget.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let attempt_started = Instant::now();
        let outcome = match tokio::time::timeout(budget.timeout, attempt_fn()).await {
            Ok(result) => result,
            Err(_) => Err(Failure::transient(format!(
                "timed out after {:?}",
                budget.timeout
            ))),
        };
        let elapsed_ms = attempt_started.elapsed().as_millis() as u64;

        let failure = match outcome {
            Ok(value) => {
                debug!(operation, attempt, elapsed_ms, "call succeeded");
                return Ok(value);
            }
            Err(failure) => failure,
        };

        warn!(
            operation,
            attempt,
            elapsed_ms,
            class = ?failure.class,
            error = %failure.message,
            "call attempt failed"
        );

        if !failure.class.is_retryable() || attempt >= max_attempts {
            return Err(CallError {
                operation: operation.to_string(),
                attempts: attempt,
                elapsed: started.elapsed(),
                last: failure,
            });
        }

        tokio::time::sleep(budget.retry_delay(attempt, &failure)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant_budget() -> CallBudget {
        CallBudget {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let budget = CallBudget {
            base_delay: Duration::from_millis(100),
            ..CallBudget::default()
        };
        assert_eq!(budget.backoff(1), Duration::from_millis(100));
        assert_eq!(budget.backoff(2), Duration::from_millis(200));
        assert_eq!(budget.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn test_rate_limit_hint_wins() {
        let budget = CallBudget {
            base_delay: Duration::from_millis(100),
            ..CallBudget::default()
        };
        let hinted = Failure::rate_limited("slow down", Some(Duration::from_secs(7)));
        assert_eq!(budget.retry_delay(1, &hinted), Duration::from_secs(7));

        let unhinted = Failure::rate_limited("slow down", None);
        assert_eq!(budget.retry_delay(2, &unhinted), Duration::from_millis(200));
    }

    #[test]
    fn test_rate_limit_hint_capped_at_timeout() {
        let budget = CallBudget {
            timeout: Duration::from_secs(30),
            ..CallBudget::default()
        };
        let day = Failure::rate_limited("come back tomorrow", Some(Duration::from_secs(86_400)));
        assert_eq!(budget.retry_delay(1, &day), Duration::from_secs(30));
    }

    #[test]
    fn test_status_classification() {
        let f = Failure::from_status(StatusCode::TOO_MANY_REQUESTS, None, "");
        assert_eq!(f.class, FailureClass::RateLimited);
        let f = Failure::from_status(StatusCode::BAD_GATEWAY, None, "upstream");
        assert_eq!(f.class, FailureClass::Transient);
        assert!(f.message.contains("upstream"));
        let f = Failure::from_status(StatusCode::NOT_FOUND, None, "");
        assert_eq!(f.class, FailureClass::Permanent);
        let f = Failure::from_status(StatusCode::REQUEST_TIMEOUT, None, "");
        assert_eq!(f.class, FailureClass::Transient);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let attempts = AtomicU32::new(0);
        let result = call("search", &instant_budget(), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Failure::transient("connection reset"))
                } else {
                    Ok("hits")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "hits");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_not_retried() {
        let attempts = AtomicU32::new(0);
        let err = call("search", &instant_budget(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Failure::permanent("HTTP 400")) }
        })
        .await
        .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(err.attempts, 1);
        assert_eq!(err.class(), FailureClass::Permanent);
        assert_eq!(err.operation, "search");
    }

    #[tokio::test]
    async fn test_budget_exhausted_keeps_last_failure() {
        let attempts = AtomicU32::new(0);
        let err = call("fetch_page", &instant_budget(), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(Failure::transient(format!("attempt {}", n + 1))) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(err.class(), FailureClass::Transient);
        assert_eq!(err.last.message, "attempt 3");
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let budget = CallBudget {
            max_attempts: 2,
            base_delay: Duration::ZERO,
            timeout: Duration::from_millis(10),
        };
        let err = call("draft", &budget, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Failure>(())
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 2);
        assert_eq!(err.class(), FailureClass::Transient);
        assert!(err.last.message.contains("timed out"));
    }
}

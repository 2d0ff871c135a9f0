use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Failure reported by a hosted-dependency client (embedding API, vector
/// index, chat completions). The split into transient and permanent drives
/// the retry policy: only transient failures are retried.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request timed out")]
    Timeout,
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

impl ClientError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_connect() || err.is_request() {
            ClientError::Transient(err.to_string())
        } else {
            ClientError::Permanent(err.to_string())
        }
    }

    /// Classifies a non-success HTTP status. 429/502/503 are retryable.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            429 | 502 | 503 => ClientError::Transient(format!("HTTP {}: {}", status.as_u16(), body)),
            _ => ClientError::Permanent(format!("HTTP {}: {}", status.as_u16(), body)),
        }
    }
}

/// Outcome of a retried operation, collapsed onto the small taxonomy callers
/// branch on. The original low-level error never crosses this boundary.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("{0} timed out after retries")]
    Timeout(String),
    #[error("{0} unavailable: {1}")]
    Unavailable(String, String),
}

/// Exponential-backoff policy for transient dependency failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

/// Runs `operation` under the policy. Transient errors are retried with
/// exponential backoff; permanent errors return immediately as
/// `Unavailable`. Exhausted retries surface as `Timeout` when the last
/// failure was a timeout, `Unavailable` otherwise.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut delay = Duration::from_millis(policy.base_delay_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);
    let mut last_error: Option<ClientError> = None;

    for attempt in 1..=policy.max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(ClientError::Permanent(message)) => {
                return Err(RetryError::Unavailable(operation_name.to_string(), message));
            }
            Err(err) => {
                tracing::warn!(
                    stage = "retry",
                    operation = operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "transient failure"
                );
                last_error = Some(err);
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(delay).await;
            delay = delay.mul_f64(policy.multiplier).min(max_delay);
        }
    }

    match last_error {
        Some(ClientError::Timeout) => Err(RetryError::Timeout(operation_name.to_string())),
        Some(err) => Err(RetryError::Unavailable(
            operation_name.to_string(),
            err.to_string(),
        )),
        None => Err(RetryError::Unavailable(
            operation_name.to_string(),
            "no attempts executed".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 4,
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&fast_policy(), "embed", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ClientError::Transient("connection reset".into()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_short_circuit() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<u32, _> = retry_with_backoff(&fast_policy(), "search", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::Permanent("HTTP 401: bad key".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Unavailable(_, _))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_timeouts_surface_as_timeout() {
        let result: Result<u32, _> =
            retry_with_backoff(&fast_policy(), "embed", || async { Err(ClientError::Timeout) })
                .await;

        match result {
            Err(RetryError::Timeout(op)) => assert_eq!(op, "embed"),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            ClientError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            ClientError::Transient(_)
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::BAD_GATEWAY, String::new()),
            ClientError::Transient(_)
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::UNAUTHORIZED, String::new()),
            ClientError::Permanent(_)
        ));
    }
}

//! Retry policy shared by the tool executor, supervisor, and coordinator.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::{Error, Result};

/// Configuration for retrying failed operations with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the backoff delay.
    pub max_delay: Duration,
    /// Backoff multiplier applied per attempt. Must be greater than 1.
    pub multiplier: f64,
    /// Message substrings that mark an error as retryable in addition to
    /// its code classification.
    pub retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            retryable_errors: vec![
                "connection refused".to_string(),
                "timeout".to_string(),
                "connection reset".to_string(),
                "temporary".to_string(),
            ],
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// The delay before retry number `attempt` (0-based):
    /// `min(initial · multiplier^attempt, max)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exact = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(exact.min(self.max_delay.as_secs_f64()))
    }

    /// Whether `error` should be retried under this policy.
    ///
    /// Classification is structured first (the error code), then falls back
    /// to substring matching against [`RetryPolicy::retryable_errors`].
    #[must_use]
    pub fn should_retry(&self, error: &Error) -> bool {
        if error.is_retryable() {
            return true;
        }
        let text = error.to_string().to_lowercase();
        self.retryable_errors
            .iter()
            .any(|needle| text.contains(needle.as_str()))
    }
}

/// Run `attempt_fn` under `policy`, backing off between attempts.
///
/// The context is checked before every attempt and while sleeping; a
/// cancelled context ends the loop with a `context_timeout` error. The
/// final error after exhaustion carries `retry_attempt` and `max_attempts`
/// in its context.
pub async fn retry_async<T, F, Fut>(
    ctx: &RunContext,
    policy: &RetryPolicy,
    component: &str,
    operation: &str,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_retries + 1;
    let mut last_error: Option<Error> = None;

    for attempt in 0..attempts {
        ctx.ensure_active(component, operation)?;
        if attempt > 0 {
            let delay = policy.delay_for(attempt - 1);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = ctx.cancelled() => return Err(Error::cancelled(component, operation)),
            }
        }

        match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !policy.should_retry(&error) {
                    return Err(error);
                }
                tracing::debug!(
                    component,
                    operation,
                    attempt,
                    error = %error,
                    "retryable failure"
                );
                last_error = Some(error);
            }
        }
    }

    let error = last_error
        .unwrap_or_else(|| Error::internal(component, operation, "retry loop ran zero attempts"));
    Err(error
        .with_context("retry_attempt", attempts)
        .with_context("max_attempts", attempts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for(10), Duration::from_millis(350));
    }

    #[test]
    fn substring_match_marks_errors_retryable() {
        let policy = RetryPolicy::default();
        let err = Error::new(
            ErrorCode::ToolExecution,
            "tool_executor",
            "execute",
            "upstream said: Connection Refused",
        );
        assert!(policy.should_retry(&err));

        let err = Error::new(ErrorCode::ToolExecution, "tool_executor", "execute", "bad args");
        assert!(!policy.should_retry(&err));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let ctx = RunContext::new();
        let counter = Arc::new(AtomicU32::new(0));

        let calls = Arc::clone(&counter);
        let result = retry_async(&ctx, &policy, "test", "op", move |_| {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::new(ErrorCode::ToolTimeout, "test", "op", "timeout"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_records_attempt_counts() {
        let policy = RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let ctx = RunContext::new();

        let result: Result<()> = retry_async(&ctx, &policy, "test", "op", |_| async {
            Err(Error::new(ErrorCode::ToolTimeout, "test", "op", "timeout"))
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.context["retry_attempt"], 3);
        assert_eq!(err.context["max_attempts"], 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let policy = RetryPolicy::default();
        let ctx = RunContext::new();
        let counter = Arc::new(AtomicU32::new(0));

        let calls = Arc::clone(&counter);
        let result: Result<()> = retry_async(&ctx, &policy, "test", "op", move |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::invalid_input("test", "op", "bad input"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_context_stops_the_loop() {
        let policy = RetryPolicy::default();
        let ctx = RunContext::new();
        ctx.cancel();

        let result: Result<()> =
            retry_async(&ctx, &policy, "test", "op", |_| async { Ok(()) }).await;
        assert_eq!(result.unwrap_err().code, ErrorCode::ContextTimeout);
    }
}

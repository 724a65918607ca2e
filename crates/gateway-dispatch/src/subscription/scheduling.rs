//! Scheduling primitives composed by the dispatcher:
//! delay (start date), retry with backoff, deadline (end date).
//!
//! All waits are `tokio::time` timers, so paused-clock tests drive them
//! with `tokio::time::advance`.

use crate::domain::config::RetryConfig;
use crate::domain::error::DispatchResult;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Time left until `at`, `None` when absent or already reached
pub fn duration_until(now: DateTime<Utc>, at: Option<DateTime<Utc>>) -> Option<Duration> {
    let remaining = at? - now;
    remaining.to_std().ok().filter(|d| !d.is_zero())
}

/// Suspend for `delay` when one is set
pub async fn delay(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

/// Run `operation` until it ends or the deadline elapses.
///
/// Reaching the deadline is a natural termination and completes with `Ok(())`.
pub async fn with_deadline<F>(deadline: Option<Duration>, operation: F) -> DispatchResult
where
    F: Future<Output = DispatchResult>,
{
    match deadline {
        None => operation.await,
        Some(deadline) => match tokio::time::timeout(deadline, operation).await {
            Ok(result) => result,
            Err(_) => {
                debug!(deadline_ms = deadline.as_millis() as u64, "Execution reached its end date");
                Ok(())
            }
        },
    }
}

/// Run `attempt` (1-based attempt number) until success, a non-retryable
/// error, or `max_retries` retries have failed.
pub async fn retry_with_backoff<F, Fut>(
    policy: &RetryConfig,
    subscription_id: &str,
    mut attempt: F,
) -> DispatchResult
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = DispatchResult>,
{
    let mut number = 1;
    loop {
        let error = match attempt(number).await {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };

        if !error.is_retryable() {
            warn!(
                subscription_id = %subscription_id,
                attempt = number,
                error = %error,
                "Non-retryable dispatch failure"
            );
            return Err(error);
        }

        let retry = number;
        if retry > policy.max_retries {
            warn!(
                subscription_id = %subscription_id,
                attempts = number,
                error = %error,
                "Dispatch retries exhausted"
            );
            return Err(error);
        }

        let wait = policy.delay_for(retry);
        warn!(
            subscription_id = %subscription_id,
            attempt = number,
            retry_in_ms = wait.as_millis() as u64,
            error = %error,
            "Dispatch attempt failed, retrying"
        );
        tokio::time::sleep(wait).await;
        number += 1;
    }
}

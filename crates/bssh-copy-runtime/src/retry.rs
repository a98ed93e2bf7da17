//! Bounded retry and polling.

use std::future::Future;

use bssh_copy_core::config::RetryPolicy;
use bssh_copy_core::error::{CopyError, Result};
use bssh_copy_core::SyncState;

/// Run `op` until it succeeds, fails permanently, or the policy is exhausted.
///
/// Only transient errors are retried. Exhaustion is reported as
/// `RetriesExhausted` carrying the last error.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.calculate_backoff(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) if e.is_retryable() => {
                return Err(CopyError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last_error: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
}

/// Poll `check` until it reports `Done`.
///
/// `Pending` and transient errors both consume an attempt. When the policy
/// runs out the poll fails with `SyncTimeout`.
pub async fn poll_until_done<F, Fut>(policy: &RetryPolicy, mut check: F) -> Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<SyncState>>,
{
    for attempt in 1..=policy.max_attempts {
        match check().await {
            Ok(SyncState::Done) => return Ok(attempt),
            Ok(SyncState::Pending) => {
                tracing::debug!(attempt, "Sync still pending");
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(attempt, error = %e, "Sync check failed, will poll again");
            }
            Err(e) => return Err(e),
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.calculate_backoff(attempt)).await;
        }
    }
    Err(CopyError::SyncTimeout {
        attempts: policy.max_attempts,
    })
}

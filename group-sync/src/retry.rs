//! Retry of transient API failures, shared by the registry and directory clients.

use crate::config::RetryConfig;
use crate::error::GroupSyncResult;
use backoff::ExponentialBackoffBuilder;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// has been retried `max_retries` times. A rate-limit response waits for the
/// server's `Retry-After` instead of the backoff interval.
pub(crate) async fn retry_transient<T, F, Fut>(
    retry: &RetryConfig,
    target: &str,
    mut operation: F
) -> GroupSyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GroupSyncResult<T>>
{
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(retry.initial_backoff_ms))
        .with_max_interval(Duration::from_millis(retry.max_backoff_ms))
        .with_max_elapsed_time(None)
        .build();
    let max_retries = retry.max_retries;
    let mut attempt = 0u32;

    backoff::future::retry(policy, || {
        attempt += 1;
        let current = attempt;
        let request = operation();
        async move {
            request.await.map_err(|e| {
                if !e.is_retryable() || current > max_retries {
                    return backoff::Error::permanent(e);
                }
                warn!(target = %target, attempt = current, error = %e, "Retrying API request");
                match e.retry_after() {
                    Some(secs) => backoff::Error::retry_after(e, Duration::from_secs(secs)),
                    None => backoff::Error::transient(e)
                }
            })
        }
    })
    .await
}

//! Bounded poll loops, shared by the application services and the cloud
//! adapter.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;

use crate::domain::CpiError;

/// Calls `attempt` until it yields a value, sleeping `interval` between
/// calls.
///
/// `attempt` always runs at least once. Its errors end the loop immediately.
///
/// # Errors
///
/// Returns [`CpiError::Timeout`] once `timeout` has elapsed without a value,
/// or the first error from `attempt`.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    loop {
        if let Some(value) = attempt().await? {
            return Ok(value);
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            tracing::warn!(what, elapsed_secs = elapsed.as_secs(), "poll timed out");
            return Err(CpiError::Timeout {
                what: what.to_string(),
                elapsed_secs: elapsed.as_secs(),
            }
            .into());
        }
        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}

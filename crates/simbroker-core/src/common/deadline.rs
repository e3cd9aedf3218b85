//! Bounded timeouts for outbound calls.
//!
//! Nothing in the broker/worker protocol is retried, so every outbound call
//! carries a deadline instead. An expired deadline fails only the call it
//! wraps.

use crate::common::error::{Error, Result};
use core::future::Future;
use core::time::Duration;
use tokio::time::timeout;

/// Awaits `fut` for at most `limit`, mapping expiry to [`Error::Timeout`].
pub async fn with_deadline<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout {
            operation,
            after: limit,
        }),
    }
}

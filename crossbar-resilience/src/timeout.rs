//! Per-call timeout enforcement.
//!
//! A cancellable timer raced against the operation; used by the circuit
//! breaker so a hung call cannot hold a probe slot indefinitely.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Execute a future with a deadline. Returns the elapsed budget on expiry.
pub async fn with_timeout<F, Fut, T>(duration: Duration, f: F) -> Result<T, Duration>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    match tokio::time::timeout(duration, f()).await {
        Ok(result) => Ok(result),
        Err(_) => {
            warn!(duration = ?duration, "Operation timed out");
            Err(duration)
        }
    }
}

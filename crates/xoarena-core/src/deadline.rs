//! Deadline-guarded calls.
//!
//! An external call is raced against a timer. The call runs on its own
//! tokio task, so when the timer wins the caller gets
//! [`CoreError::Timeout`] while the call itself keeps running in the
//! background and its result is discarded. Callers must tolerate such a
//! dangling effect (e.g. a store write that lands after we gave up).

use std::future::Future;
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Runs `op` with a hard deadline.
///
/// The timer is dropped as soon as either side resolves. A panic inside
/// `op` surfaces as [`CoreError::TaskFailed`].
pub async fn guard<F, T>(label: &str, deadline: Duration, op: F) -> CoreResult<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::spawn(op);
    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_err)) => Err(CoreError::TaskFailed(join_err.to_string())),
        Err(_) => {
            tracing::debug!(label, deadline_ms = deadline.as_millis() as u64, "call abandoned");
            Err(CoreError::Timeout {
                label: label.to_string(),
                after_ms: deadline.as_millis() as u64,
            })
        }
    }
}

/// Like [`guard`], for operations that already return a [`CoreResult`].
pub async fn try_guard<F, T>(label: &str, deadline: Duration, op: F) -> CoreResult<T>
where
    F: Future<Output = CoreResult<T>> + Send + 'static,
    T: Send + 'static,
{
    guard(label, deadline, op).await?
}

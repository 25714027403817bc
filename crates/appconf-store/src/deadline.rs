//! Deadlines composed with caller cancellation

use crate::errors::{cancelled, io_error, timeout, Result};
use appconf_core::{CancelSignal, ExError};
use std::future::Future;
use std::time::Duration;

/// Run `fut` until it finishes, `limit` elapses, or `cancel` fires
///
/// Cancellation wins over the deadline when both are ready, so a caller that
/// gave up always sees `Cancelled`, never `Timeout`.
/// A zero `limit` has already elapsed and fails without starting `fut`.
///
/// # Errors
///
/// The future's own error, `ExErrorKind::Timeout` when the deadline elapsed,
/// or `ExErrorKind::Cancelled` when the signal fired.
pub async fn with_deadline<T, F>(op: &str, limit: Duration, cancel: &CancelSignal, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(cancelled(op));
    }
    if limit.is_zero() {
        return Err(timeout(op, limit));
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled(op)),
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(timeout(op, limit)),
        },
    }
}

/// Run `fut` on its own task so an interruption never abandons it midway
///
/// Returns the future's output together with the interruption (`Cancelled`
/// or `Timeout`) that fired before it finished, if any. Work that completed
/// after an interruption is the caller's to undo.
pub async fn run_to_completion<T, F>(
    op: &str,
    limit: Duration,
    cancel: &CancelSignal,
    fut: F,
) -> (Result<T>, Option<ExError>)
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let mut task = tokio::spawn(fut);
    let interrupted = tokio::select! {
        biased;
        _ = cancel.cancelled() => cancelled(op),
        _ = tokio::time::sleep(limit) => timeout(op, limit),
        joined = &mut task => return (joined_output(op, joined), None),
    };
    (joined_output(op, task.await), Some(interrupted))
}

fn joined_output<T>(op: &str, joined: std::result::Result<Result<T>, tokio::task::JoinError>) -> Result<T> {
    joined.unwrap_or_else(|e| Err(io_error(op, std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))))
}

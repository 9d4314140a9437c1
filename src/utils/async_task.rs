use std::time::Duration;

use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::config::BackoffPolicy;
use crate::errors::Error;
use crate::errors::Result;
use crate::errors::TransportError;

/// Attempt outcome that tells the retry loop whether another round is worth
/// having.
pub(crate) enum TaskError {
    /// Stop immediately and surface the error (e.g. NotFound).
    NonRetryable(Error),
    /// Back off and try again, budget permitting.
    Retryable(Error),
}

impl From<Error> for TaskError {
    fn from(e: Error) -> Self {
        if e.is_non_retryable() {
            TaskError::NonRetryable(e)
        } else {
            TaskError::Retryable(e)
        }
    }
}

/// Runs `task` under `policy`: per-attempt timeout, exponential backoff
/// between attempts, immediate exit on a non-retryable error.
pub(crate) async fn retry_with_backoff<F, T, P>(
    policy: BackoffPolicy,
    task: F,
) -> Result<P>
where
    F: Fn() -> T,
    T: std::future::Future<Output = std::result::Result<P, TaskError>>,
{
    let mut current_delay = Duration::from_millis(policy.base_delay_ms);
    let timeout_duration = Duration::from_millis(policy.timeout_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);
    let max_retries = policy.max_retries;

    let mut last_error = Error::Transport(TransportError::Timeout(timeout_duration));
    let mut retries = 0;
    while retries < max_retries {
        match timeout(timeout_duration, task()).await {
            Ok(Ok(r)) => {
                return Ok(r);
            }
            Ok(Err(TaskError::NonRetryable(e))) => {
                debug!(error = %e, "attempt failed with non-retryable error");
                return Err(e);
            }
            Ok(Err(TaskError::Retryable(e))) => {
                warn!(error = %e, "attempt failed");
                last_error = e;
            }
            Err(_) => {
                warn!(?timeout_duration, "attempt timed out");
                last_error = Error::Transport(TransportError::Timeout(timeout_duration));
            }
        }

        if retries < max_retries - 1 {
            debug!(?current_delay, "retrying after backoff");
            sleep(current_delay).await;

            // Exponential backoff (double the delay each time)
            current_delay = (current_delay * 2).min(max_delay);
        }
        retries += 1;
    }

    warn!(retries = max_retries, "task failed after max retries");
    Err(last_error)
}

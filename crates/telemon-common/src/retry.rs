//! Retry with linear backoff for transient infrastructure failures.
//!
//! Callers classify their own error types through [`Transient`]; the policy
//! only decides how often and how long to wait. Every wait races the
//! caller's [`CancellationToken`], so shutdown is never held up by a sleeping
//! retry loop.

use std::fmt::Display;
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Classifies an error as worth retrying.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for tonic::Status {
    fn is_transient(&self) -> bool {
        matches!(
            self.code(),
            tonic::Code::Unavailable | tonic::Code::DeadlineExceeded
        )
    }
}

/// Walks an error's source chain looking for a connection-level I/O failure
/// (refused, reset, timed out, ...).
pub fn is_transient_io(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::BrokenPipe
                    | ErrorKind::TimedOut
            ) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// Backoff schedule: the wait after failed attempt `i` (0-indexed) is
/// `initial_delay + i * delay_step`, for at most `max_retries` retries.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use telemon_common::retry::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_retries, 3);
/// assert_eq!(policy.delay_for(0), Duration::from_secs(1));
/// assert_eq!(policy.delay_for(1), Duration::from_secs(3));
/// assert_eq!(policy.delay_for(2), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub delay_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            delay_step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.initial_delay + self.delay_step * attempt
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, the
    /// retries are exhausted or `cancel` fires during a backoff wait. The
    /// last error is returned unchanged.
    pub async fn retry_with_result<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let mut attempt = 0u32;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() || attempt >= self.max_retries {
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            tracing::warn!(
                attempt = attempt + 1,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Retry wait cancelled");
                    return Err(err);
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

/// [`RetryPolicy::retry_with_result`] with the default schedule.
pub async fn retry_with_result<T, E, F, Fut>(cancel: &CancellationToken, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    RetryPolicy::default().retry_with_result(cancel, op).await
}

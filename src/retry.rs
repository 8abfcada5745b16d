//! Retry logic with exponential backoff
//!
//! Every content backend call made by an executor goes through this module.
//! Retryable failures (see [`IsRetryable`]) are retried with exponential backoff
//! and optional jitter, and each attempt can be bounded by a per-request timeout
//! with [`with_timeout`]. Backoff sleeps end early when the caller's
//! cancellation token fires; the last error is returned in that case.
//!
//! # Example
//!
//! ```no_run
//! use media_dl::retry::{IsRetryable, download_with_retry};
//! use media_dl::config::RetryConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let result = download_with_retry(&config, &cancel, || async {
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{BackendError, Error};
use futures::future::BoxFuture;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for BackendError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Backend(e) => e.retryable,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            // Everything else is a caller or state error
            _ => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// Returns the successful result or the last error once `config.max_attempts`
/// retries are exhausted, or once `cancel` fires during a backoff sleep.
/// Non-retryable errors are returned immediately.
pub async fn download_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut backoff = Backoff::new(config, cancel);

    loop {
        match operation().await {
            Ok(result) => {
                backoff.log_success();
                return Ok(result);
            }
            Err(e) => backoff.on_error(e).await?,
        }
    }
}

/// Like [`download_with_retry`], but the operation borrows mutable state on each attempt
///
/// Used for cursor-owning enumerators: a failed attempt must leave the state
/// where it was so the next attempt fetches the same page.
pub async fn retry_with_state<S, F, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    state: &mut S,
    mut operation: F,
) -> Result<T, E>
where
    S: ?Sized,
    F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut backoff = Backoff::new(config, cancel);

    loop {
        match operation(state).await {
            Ok(result) => {
                backoff.log_success();
                return Ok(result);
            }
            Err(e) => backoff.on_error(e).await?,
        }
    }
}

/// Bound a single backend request by `timeout`
///
/// Elapsed requests become a retryable [`BackendError`].
pub async fn with_timeout<T, Fut>(timeout: Duration, request: Fut) -> Result<T, BackendError>
where
    Fut: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::timeout(timeout)),
    }
}

struct Backoff<'c> {
    config: &'c RetryConfig,
    cancel: &'c CancellationToken,
    attempt: u32,
    delay: Duration,
}

impl<'c> Backoff<'c> {
    fn new(config: &'c RetryConfig, cancel: &'c CancellationToken) -> Self {
        Self {
            config,
            cancel,
            attempt: 0,
            delay: config.initial_delay,
        }
    }

    fn log_success(&self) {
        if self.attempt > 0 {
            tracing::info!(attempts = self.attempt + 1, "Operation succeeded after retry");
        }
    }

    /// Sleep before the next attempt, or hand the error back if retrying is over
    async fn on_error<E>(&mut self, e: E) -> Result<(), E>
    where
        E: IsRetryable + std::fmt::Display,
    {
        if !e.is_retryable() {
            tracing::error!(error = %e, "Operation failed with non-retryable error");
            return Err(e);
        }
        if self.cancel.is_cancelled() {
            tracing::debug!(error = %e, "Operation cancelled, not retrying");
            return Err(e);
        }
        if self.attempt >= self.config.max_attempts {
            tracing::error!(
                error = %e,
                attempts = self.attempt + 1,
                "Operation failed after all retry attempts exhausted"
            );
            return Err(e);
        }

        self.attempt += 1;
        tracing::warn!(
            error = %e,
            attempt = self.attempt,
            max_attempts = self.config.max_attempts,
            delay_ms = self.delay.as_millis() as u64,
            "Operation failed, retrying"
        );

        let wait = if self.config.jitter {
            add_jitter(self.delay)
        } else {
            self.delay
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::debug!(error = %e, "Operation cancelled during backoff");
                return Err(e);
            }
            _ = tokio::time::sleep(wait) => {}
        }

        self.delay = scaled(self.delay, self.config.backoff_multiplier, self.config.max_delay);
        Ok(())
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor)).unwrap_or(delay)
}

/// `delay * factor`, capped at `max`; out-of-range results become `max`
fn scaled(delay: Duration, factor: f64, max: Duration) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
        .map_or(max, |next| next.min(max))
}

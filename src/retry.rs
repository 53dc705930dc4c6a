//! Retry logic with exponential backoff
//!
//! Transient transfer failures are retried with exponential backoff
//! (`base_delay * 2^attempt`, capped at `max_backoff`) scaled by a random
//! jitter factor in `[0.75, 1.25]` so that many bot callers failing at the
//! same moment do not retry in lockstep. Every wait is cancellable.
//!
//! # Example
//!
//! ```no_run
//! use audio_dl::config::RetryConfig;
//! use audio_dl::retry::download_with_retry;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> audio_dl::Result<()> {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let (result, attempts) = download_with_retry(&config, &cancel, |attempt| async move {
//!     // attempt is 0 for the first try
//!     Ok::<_, audio_dl::Error>(attempt)
//! })
//! .await;
//! # let _ = (result?, attempts);
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Lower bound of the jitter band
const JITTER_MIN: f64 = 0.75;
/// Upper bound of the jitter band
const JITTER_MAX: f64 = 1.25;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, 5xx, truncated bodies,
/// checksum/size mismatches) return `true`. Permanent failures
/// (cancellation, bad configuration, 404) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Transport failures are retryable unless the request itself is malformed
            Error::Network(e) => !e.is_builder(),
            // Server-side and throttling statuses are worth another try
            Error::HttpStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            // A failed part only sinks one multipart attempt
            Error::PartFailed { .. } => true,
            // Partial output is discarded and fetched again
            Error::SizeMismatch { .. } | Error::ChecksumMismatch { .. } => true,
            Error::Cancelled => false,
            Error::Config { .. } | Error::InvalidDescriptor(_) => false,
            Error::Exhausted { .. } => false,
            Error::Shared(inner) => inner.is_retryable(),
            Error::Other(_) => false,
        }
    }
}

/// Base delay before retry number `attempt` (1 for the first retry), without jitter
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(31));
    config
        .base_delay
        .saturating_mul(factor)
        .min(config.max_backoff)
}

/// Scale a delay by a uniformly random factor in `[0.75, 1.25]`
pub fn apply_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

/// Sleep for `delay` unless `cancel` fires first
pub async fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Execute an async operation up to `config.max_retries` times with backoff
///
/// The operation receives the zero-based attempt number, which lets callers
/// route later attempts differently (e.g. through a proxy override).
/// Non-retryable errors and cancellation return immediately.
///
/// Returns the final result together with the number of attempts made.
pub async fn download_with_retry<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> (Result<T>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_retries.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return (Err(Error::Cancelled), attempt);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = operation(attempt) => result,
        };
        attempt += 1;

        match result {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Transfer succeeded after retry");
                }
                return (Ok(value), attempt);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let base = backoff_delay(config, attempt);
                let delay = if config.jitter { apply_jitter(base) } else { base };

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Transfer attempt failed, retrying"
                );

                if let Err(cancelled) = sleep_cancellable(delay, cancel).await {
                    return (Err(cancelled), attempt);
                }
            }
            Err(e) => {
                if e.is_cancelled() {
                    tracing::debug!("Transfer cancelled by caller");
                } else if e.is_retryable() {
                    tracing::warn!(
                        error = %e,
                        attempts = attempt,
                        "Transfer failed after all retry attempts"
                    );
                } else {
                    tracing::warn!(error = %e, "Transfer failed with non-retryable error");
                }
                return (Err(e), attempt);
            }
        }
    }
}

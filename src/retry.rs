//! Retry with exponential backoff for small-document fetches
//!
//! Loan requests, bearer tokens, audio book manifests and DRM tokens are
//! short documents; a transient network failure while fetching one is retried
//! with exponential backoff and optional jitter. Book bodies are never retried
//! here, and neither are persistence errors.
//!
//! # Example
//!
//! ```no_run
//! use book_borrow::retry::{IsRetryable, fetch_with_retry};
//! use book_borrow::config::RetryConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum FetchError {
//!     Reset,
//!     Forbidden,
//! }
//!
//! impl std::fmt::Display for FetchError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for FetchError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, FetchError::Reset)
//!     }
//! }
//!
//! # async fn example() -> Result<(), FetchError> {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let body = fetch_with_retry(&config, &cancel, || async {
//!     Ok::<_, FetchError>(b"{}".to_vec())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Classifies errors as transient (worth retrying) or permanent
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Local state, parse and policy errors do not improve on retry
            Error::Config { .. }
            | Error::Database(_)
            | Error::Format(_)
            | Error::Serialization(_)
            | Error::InvalidBookId(_)
            | Error::InvalidMimeType(_)
            | Error::InvalidUri(_)
            | Error::NotSupported(_)
            | Error::Other(_) => false,
        }
    }
}

/// Run `operation`, retrying transient failures with exponential backoff
///
/// Returns the first success, the first permanent error, or the last error
/// once `config.max_attempts` retries are used up. Cancelling `cancel` while
/// waiting between attempts stops retrying and returns the last error; the
/// caller decides whether that is a cancellation.
pub async fn fetch_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "fetch succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "fetch failed, retrying"
                );

                let wait = if config.jitter { add_jitter(delay) } else { delay };
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => return Err(e),
                }

                let next = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(error = %e, attempts = attempt + 1, "fetch retries exhausted");
                } else {
                    tracing::debug!(error = %e, "fetch failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Spread `delay` uniformly over `[delay, 2 * delay]`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + factor))
}

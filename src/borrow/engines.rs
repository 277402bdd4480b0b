//! DRM engines supplied by the embedding application
//!
//! Adobe and AxisNow fulfillment happen in vendor code this crate does not
//! ship. Subtasks reach it through these traits and wait for it with a bounded
//! timeout that also honours cancellation.

use crate::drm::AdobeLoan;
use crate::types::AdobeCredentials;
use async_trait::async_trait;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure reported by a DRM engine
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DrmEngineError {
    /// Human-readable description
    pub message: String,
    /// Vendor error code, if the engine reported one
    pub vendor_code: Option<String>,
}

impl DrmEngineError {
    /// Create an error without a vendor code
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            vendor_code: None,
        }
    }
}

/// What Adobe fulfillment produced
#[derive(Clone, Debug)]
pub struct AdobeFulfillment {
    /// The decrypted-on-read book file, in a temporary location
    pub book: PathBuf,
    /// Rights document
    pub rights: Vec<u8>,
    /// Loan details
    pub loan: AdobeLoan,
}

/// Adobe Content Server fulfillment engine
#[async_trait]
pub trait AdobeEngine: Send + Sync {
    /// Fulfill an ACSM token
    ///
    /// The engine should stop promptly once `cancel` fires.
    async fn fulfill(
        &self,
        acsm: &[u8],
        credentials: &AdobeCredentials,
        cancel: CancellationToken,
    ) -> Result<AdobeFulfillment, DrmEngineError>;
}

/// What AxisNow fulfillment produced
#[derive(Clone, Debug)]
pub struct AxisFulfillment {
    /// The encrypted book file, in a temporary location
    pub book: PathBuf,
    /// License document
    pub license: Vec<u8>,
    /// Book-vault user key
    pub user_key: Vec<u8>,
}

/// AxisNow fulfillment service
#[async_trait]
pub trait AxisNowService: Send + Sync {
    /// Fulfill an AxisNow token document
    async fn fulfill(
        &self,
        token: &[u8],
        cancel: CancellationToken,
    ) -> Result<AxisFulfillment, DrmEngineError>;
}

/// Outcome of a bounded wait
#[derive(Debug)]
pub(crate) enum Bounded<T> {
    Completed(T),
    TimedOut,
    Cancelled,
}

/// Run `start` with a child cancellation token, waiting at most `limit`
///
/// On timeout or cancellation the child token is cancelled and the future dropped.
pub(crate) async fn bounded_wait<T, F, Fut>(
    limit: Duration,
    cancel: &CancellationToken,
    start: F,
) -> Bounded<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = T>,
{
    let child = cancel.child_token();
    let work = tokio::time::timeout(limit, start(child.clone()));
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Bounded::Cancelled,
        finished = work => match finished {
            Ok(value) => Bounded::Completed(value),
            Err(_) => Bounded::TimedOut,
        },
    };
    if !matches!(outcome, Bounded::Completed(_)) {
        child.cancel();
    }
    outcome
}

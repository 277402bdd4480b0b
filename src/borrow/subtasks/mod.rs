//! Subtasks shipped with the crate

mod acsm;
mod audiobook;
mod axis;
mod bearer_token;
mod content_copy;
mod direct_download;
mod loan;
mod saml;

pub use self::acsm::AcsmFactory;
pub use self::audiobook::AudioBookManifestFactory;
pub use self::axis::AxisNowFactory;
pub use self::bearer_token::{BearerTokenDocument, BearerTokenFactory};
pub use self::content_copy::ContentCopyFactory;
pub use self::direct_download::DirectDownloadFactory;
pub use self::loan::LoanCreationFactory;
pub use self::saml::SamlDownloadFactory;

use super::context::BorrowContext;
use super::http::{DownloadOutcome, HttpRequest};
use crate::error::{BorrowErrorCode, SubtaskError};
use crate::progress::ProgressThrottle;
use std::path::Path;
use url::Url;

/// True for `http` and `https` targets
pub(crate) fn is_http(target: Option<&Url>) -> bool {
    target.is_some_and(|u| matches!(u.scheme(), "http" | "https"))
}

/// The current element's target, or a failure if the path never supplied one
pub(crate) fn require_target(context: &mut BorrowContext) -> Result<Url, SubtaskError> {
    match context.current_target() {
        Some(target) => Ok(target.clone()),
        None => {
            let mime_type = context.current_element().mime_type.clone();
            Err(context.fail(
                BorrowErrorCode::HttpRequestFailed,
                format!("no location to fetch {mime_type} from"),
            ))
        }
    }
}

/// Stream `request` to `destination`, publishing throttled progress
pub(crate) async fn download_with_progress(
    context: &BorrowContext,
    request: &HttpRequest,
    destination: &Path,
    message: &str,
) -> DownloadOutcome {
    let http = context.http();
    let cancel = context.cancellation().clone();
    let mut throttle = ProgressThrottle::new(context.config().progress.window);
    let mut progress = |received: u64, expected: Option<u64>| {
        if let Some(sample) = throttle.sample(context.now(), received, expected) {
            context.book_download_is_running(
                sample.received,
                sample.expected,
                sample.units_per_second,
                message,
            );
        }
    };
    http.download(request, destination, &cancel, &mut progress).await
}

//! Plain HTTP download of final book content

use super::{download_with_progress, is_http, require_target};
use crate::borrow::context::BorrowContext;
use crate::borrow::directory::{Subtask, SubtaskFactory};
use crate::borrow::http::{DownloadOutcome, remove_quietly};
use crate::drm::DrmKind;
use crate::error::{BorrowErrorCode, SubtaskError};
use crate::mime::{self, MimeType};
use crate::types::AccountState;
use crate::utils::run_blocking;
use async_trait::async_trait;
use url::Url;

/// Downloads EPUB and PDF files over HTTP(S)
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectDownloadFactory;

/// True if `mime_type` is final book content served over HTTP(S)
pub(crate) fn is_direct_download(mime_type: &MimeType, target: Option<&Url>) -> bool {
    mime_type.is_downloadable_book() && is_http(target)
}

impl SubtaskFactory for DirectDownloadFactory {
    fn name(&self) -> &'static str {
        "direct_download"
    }

    fn is_applicable_for(
        &self,
        mime_type: &MimeType,
        target: Option<&Url>,
        _account: Option<&AccountState>,
    ) -> bool {
        is_direct_download(mime_type, target)
    }

    fn create(&self) -> Box<dyn Subtask> {
        Box::new(DirectDownload { saml: false })
    }
}

/// Download the current element's content and persist it
///
/// With `saml` set, an HTML response is the identity provider's login page:
/// the walk halts waiting for external authentication instead of failing.
pub(crate) struct DirectDownload {
    pub(crate) saml: bool,
}

#[async_trait]
impl Subtask for DirectDownload {
    async fn execute(&mut self, context: &mut BorrowContext) -> Result<(), SubtaskError> {
        let mime_type = context.current_element().mime_type.clone();

        context.recorder().begin_new_step("Preparing download");
        if self.saml && !context.account().is_saml() {
            return Err(context.fail(
                BorrowErrorCode::SamlNoCredentials,
                "the account has no SAML session",
            ));
        }
        let target = require_target(context)?;
        let handle = context.format_handle_for(&mime_type)?;
        let prepared = context.temp_file_for(&target).await;
        let temp = match prepared {
            Ok(path) => path,
            Err(e) => return Err(context.persistence_failed("temporary download", e)),
        };
        context.recorder().current_step_succeeded(format!("Saving {mime_type} into {}", handle.definition()));
        context.check_cancelled()?;

        context.recorder().begin_new_step(format!("Downloading {target}"));
        let request = context.request(target.clone());
        let outcome = download_with_progress(context, &request, &temp, "Downloading").await;

        let (content_type, final_url) = match outcome {
            DownloadOutcome::Succeeded {
                content_type,
                final_url,
                bytes,
            } => {
                tracing::debug!(book_id = %context.book_id(), bytes, "download finished");
                (content_type, final_url)
            }
            DownloadOutcome::Cancelled => return Err(context.cancelled()),
            DownloadOutcome::ServerFailed { status, detail } => {
                let mut message = format!("{target} returned status {status}");
                if let Some(detail) = detail {
                    message.push_str(": ");
                    message.push_str(&detail);
                }
                return Err(context.fail(BorrowErrorCode::HttpRequestFailed, message));
            }
            DownloadOutcome::Failed(e) => {
                if context.cancellation().is_cancelled() {
                    return Err(context.cancelled());
                }
                return Err(context.fail_with(
                    BorrowErrorCode::HttpConnectionFailed,
                    format!("could not download {target}"),
                    e,
                ));
            }
        };

        if let Some(received) = &content_type {
            if received.is(mime::HTML) {
                remove_quietly(&temp).await;
                if self.saml {
                    context.recorder().current_step_succeeded("Identity provider requires login");
                    context.book_download_is_waiting_for_external_authentication(final_url);
                    return Err(SubtaskError::HaltedEarly);
                }
                return Err(context.fail(
                    BorrowErrorCode::HttpContentTypeIncompatible,
                    format!("expected {mime_type} but the server returned a web page"),
                ));
            }
            if !received.is_compatible_with(&mime_type) && !received.is(mime::OCTET_STREAM) {
                remove_quietly(&temp).await;
                return Err(context.fail(
                    BorrowErrorCode::HttpContentTypeIncompatible,
                    format!("expected {mime_type} but received {received}"),
                ));
            }
        }
        context.recorder().current_step_succeeded("Downloaded");

        context.recorder().begin_new_step("Saving book");
        let saved = {
            let handle = handle.clone();
            let temp = temp.clone();
            run_blocking(move || handle.copy_in_book_with_drm(&temp, DrmKind::None)).await
        };
        remove_quietly(&temp).await;
        if let Err(e) = saved {
            return Err(context.persistence_failed("downloaded book", e));
        }
        context.recorder().current_step_succeeded("Saved");
        tracing::info!(
            book_id = %context.book_id(),
            format = %handle.definition(),
            "content persisted"
        );
        context.book_download_succeeded();
        Ok(())
    }
}

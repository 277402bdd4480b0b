//! Adobe ACS fulfillment

use super::require_target;
use crate::borrow::context::BorrowContext;
use crate::borrow::directory::{Subtask, SubtaskFactory};
use crate::borrow::engines::{Bounded, bounded_wait};
use crate::borrow::http::remove_quietly;
use crate::drm::{AdobeRightsUpdate, DrmHandle, DrmKind};
use crate::error::{BorrowErrorCode, SubtaskError};
use crate::mime::{self, MimeType};
use crate::types::AccountState;
use crate::utils::run_blocking;
use async_trait::async_trait;
use url::Url;

/// Fulfills ACSM tokens through the Adobe engine
///
/// Fulfillment yields the final book, so this subtask always halts the walk.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcsmFactory;

impl SubtaskFactory for AcsmFactory {
    fn name(&self) -> &'static str {
        "acsm"
    }

    fn is_applicable_for(
        &self,
        mime_type: &MimeType,
        _target: Option<&Url>,
        _account: Option<&AccountState>,
    ) -> bool {
        mime_type.is(mime::ACSM)
    }

    fn create(&self) -> Box<dyn Subtask> {
        Box::new(Acsm)
    }
}

struct Acsm;

#[async_trait]
impl Subtask for Acsm {
    async fn execute(&mut self, context: &mut BorrowContext) -> Result<(), SubtaskError> {
        context.recorder().begin_new_step("Checking Adobe DRM support");
        let Some(engine) = context.adobe_engine() else {
            return Err(context.fail(
                BorrowErrorCode::AcsNotSupported,
                "Adobe DRM is not supported on this device",
            ));
        };
        let credentials = match context.account().adobe() {
            None => {
                return Err(context.fail(
                    BorrowErrorCode::AcsNoCredentialsPre,
                    "the account has no Adobe vendor credentials",
                ));
            }
            Some(adobe) if adobe.post_activation.is_none() => {
                return Err(context.fail(
                    BorrowErrorCode::AcsNoCredentialsPost,
                    "this device has not been activated with Adobe",
                ));
            }
            Some(adobe) => adobe.clone(),
        };
        let final_type = match context.next_element() {
            Some(next) if next.mime_type.is_downloadable_book() => next.mime_type.clone(),
            _ => {
                return Err(context.fail(
                    BorrowErrorCode::AcsMissingFinalType,
                    "the ACSM token does not lead to an EPUB or PDF",
                ));
            }
        };
        let handle = context.format_handle_for(&final_type)?;
        context.recorder().current_step_succeeded("Adobe DRM available");
        context.check_cancelled()?;

        context.recorder().begin_new_step("Downloading ACSM token");
        let target = require_target(context)?;
        let response = context
            .fetch_document(target, BorrowErrorCode::HttpRequestFailed)
            .await?;
        let token = response.body;
        context.recorder().current_step_succeeded("Token downloaded");

        context.recorder().begin_new_step("Saving ACSM token");
        let saved = {
            let handle = handle.clone();
            let token = token.clone();
            run_blocking(move || {
                handle.set_drm_kind(DrmKind::Acs)?;
                let drm = handle.drm().unwrap_or(DrmHandle::None);
                let acs = drm.as_acs()?.clone();
                acs.set_acsm_file(Some(&token))?;
                Ok(acs)
            })
            .await
        };
        let acs = match saved {
            Ok(acs) => acs,
            Err(e) => return Err(context.persistence_failed("ACSM token", e)),
        };
        context.recorder().current_step_succeeded("Token saved");
        context.check_cancelled()?;

        context.recorder().begin_new_step("Fulfilling with Adobe");
        let limit = context.config().drm.adobe_timeout;
        let cancel = context.cancellation().clone();
        let outcome = bounded_wait(limit, &cancel, |child| {
            let engine = engine.clone();
            let token = token.clone();
            let credentials = credentials.clone();
            async move { engine.fulfill(&token, &credentials, child).await }
        })
        .await;
        let fulfillment = match outcome {
            Bounded::Completed(Ok(fulfillment)) => fulfillment,
            Bounded::Completed(Err(e)) => {
                return Err(context.fail_with(
                    BorrowErrorCode::AcsFulfillmentFailed,
                    "Adobe fulfillment failed",
                    e,
                ));
            }
            Bounded::TimedOut => {
                return Err(context.fail(
                    BorrowErrorCode::AcsTimedOut,
                    format!("Adobe fulfillment did not finish within {}s", limit.as_secs()),
                ));
            }
            Bounded::Cancelled => return Err(context.cancelled()),
        };
        context.recorder().current_step_succeeded("Fulfilled");

        context.recorder().begin_new_step("Saving fulfilled book");
        let saved = {
            let handle = handle.clone();
            let book = fulfillment.book.clone();
            let update = AdobeRightsUpdate {
                rights: fulfillment.rights.clone(),
                loan: fulfillment.loan.clone(),
            };
            run_blocking(move || {
                handle.copy_in_book(&book)?;
                acs.set_adobe_rights_information(Some(update))
            })
            .await
        };
        remove_quietly(&fulfillment.book).await;
        if let Err(e) = saved {
            return Err(context.persistence_failed("Adobe rights", e));
        }
        context.recorder().current_step_succeeded("Saved");
        context.recorder().add_attribute("adobe_loan_id", fulfillment.loan.loan_id.clone());
        context.book_download_succeeded();
        Err(SubtaskError::HaltedEarly)
    }
}

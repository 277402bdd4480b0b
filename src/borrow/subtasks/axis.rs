//! AxisNow fulfillment

use super::require_target;
use crate::borrow::context::BorrowContext;
use crate::borrow::directory::{Subtask, SubtaskFactory};
use crate::borrow::engines::{Bounded, bounded_wait};
use crate::borrow::http::remove_quietly;
use crate::drm::{DrmHandle, DrmKind};
use crate::error::{BorrowErrorCode, SubtaskError};
use crate::mime::{self, MimeType};
use crate::types::AccountState;
use crate::utils::run_blocking;
use async_trait::async_trait;
use url::Url;

/// Fulfills AxisNow token documents; always halts the walk
#[derive(Clone, Copy, Debug, Default)]
pub struct AxisNowFactory;

impl SubtaskFactory for AxisNowFactory {
    fn name(&self) -> &'static str {
        "axisnow"
    }

    fn is_applicable_for(
        &self,
        mime_type: &MimeType,
        _target: Option<&Url>,
        _account: Option<&AccountState>,
    ) -> bool {
        mime_type.is(mime::AXIS_NOW)
    }

    fn create(&self) -> Box<dyn Subtask> {
        Box::new(AxisNow)
    }
}

struct AxisNow;

#[async_trait]
impl Subtask for AxisNow {
    async fn execute(&mut self, context: &mut BorrowContext) -> Result<(), SubtaskError> {
        context.recorder().begin_new_step("Checking AxisNow support");
        let Some(service) = context.axis_service() else {
            return Err(context.fail(
                BorrowErrorCode::AxisNotSupported,
                "AxisNow is not supported on this device",
            ));
        };
        if context.account().credentials.is_none() {
            return Err(context.fail(
                BorrowErrorCode::AxisNoCredentials,
                "AxisNow requires a signed-in account",
            ));
        }
        // AxisNow always delivers EPUB.
        let handle = context.format_handle_for(&MimeType::epub())?;
        context.recorder().current_step_succeeded("AxisNow available");
        context.check_cancelled()?;

        context.recorder().begin_new_step("Downloading AxisNow token");
        let target = require_target(context)?;
        let response = context
            .fetch_document(target, BorrowErrorCode::HttpRequestFailed)
            .await?;
        let token = response.body;
        context.recorder().current_step_succeeded("Token downloaded");

        context.recorder().begin_new_step("Saving AxisNow token");
        let saved = {
            let handle = handle.clone();
            let token = token.clone();
            run_blocking(move || {
                handle.set_drm_kind(DrmKind::Axis)?;
                let drm = handle.drm().unwrap_or(DrmHandle::None);
                let axis = drm.as_axis()?.clone();
                axis.set_token(Some(&token))?;
                Ok(axis)
            })
            .await
        };
        let axis = match saved {
            Ok(axis) => axis,
            Err(e) => return Err(context.persistence_failed("AxisNow token", e)),
        };
        context.recorder().current_step_succeeded("Token saved");
        context.check_cancelled()?;

        context.recorder().begin_new_step("Fulfilling with AxisNow");
        let limit = context.config().drm.axis_timeout;
        let cancel = context.cancellation().clone();
        let outcome = bounded_wait(limit, &cancel, |child| {
            let service = service.clone();
            let token = token.clone();
            async move { service.fulfill(&token, child).await }
        })
        .await;
        let fulfillment = match outcome {
            Bounded::Completed(Ok(fulfillment)) => fulfillment,
            Bounded::Completed(Err(e)) => {
                return Err(context.fail_with(
                    BorrowErrorCode::AxisFulfillmentFailed,
                    "AxisNow fulfillment failed",
                    e,
                ));
            }
            Bounded::TimedOut => {
                return Err(context.fail(
                    BorrowErrorCode::AxisTimedOut,
                    format!("AxisNow fulfillment did not finish within {}s", limit.as_secs()),
                ));
            }
            Bounded::Cancelled => return Err(context.cancelled()),
        };
        context.recorder().current_step_succeeded("Fulfilled");

        context.recorder().begin_new_step("Saving fulfilled book");
        let saved = {
            let handle = handle.clone();
            let book = fulfillment.book.clone();
            let license = fulfillment.license.clone();
            let user_key = fulfillment.user_key.clone();
            run_blocking(move || {
                handle.copy_in_book(&book)?;
                axis.copy_in_license(Some(&license))?;
                axis.copy_in_user_key(Some(&user_key))
            })
            .await
        };
        remove_quietly(&fulfillment.book).await;
        if let Err(e) = saved {
            return Err(context.persistence_failed("AxisNow license", e));
        }
        context.recorder().current_step_succeeded("Saved");
        context.book_download_succeeded();
        Err(SubtaskError::HaltedEarly)
    }
}

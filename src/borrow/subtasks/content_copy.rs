//! Copy of bundled or platform-local content

use crate::borrow::context::BorrowContext;
use crate::borrow::directory::{Subtask, SubtaskFactory};
use crate::borrow::http::remove_quietly;
use crate::borrow::resolver::LOCAL_SCHEMES;
use crate::drm::DrmKind;
use crate::error::{BorrowErrorCode, SubtaskError};
use crate::mime::MimeType;
use crate::progress::ProgressThrottle;
use crate::types::AccountState;
use crate::utils::run_blocking;
use async_trait::async_trait;
use url::Url;

/// Copies `content:`, `file:` and `simplified-bundled:` sources into the book
#[derive(Clone, Copy, Debug, Default)]
pub struct ContentCopyFactory;

impl SubtaskFactory for ContentCopyFactory {
    fn name(&self) -> &'static str {
        "content_copy"
    }

    fn is_applicable_for(
        &self,
        _mime_type: &MimeType,
        target: Option<&Url>,
        _account: Option<&AccountState>,
    ) -> bool {
        target.is_some_and(|u| LOCAL_SCHEMES.contains(&u.scheme()))
    }

    fn create(&self) -> Box<dyn Subtask> {
        Box::new(ContentCopy)
    }
}

struct ContentCopy;

#[async_trait]
impl Subtask for ContentCopy {
    async fn execute(&mut self, context: &mut BorrowContext) -> Result<(), SubtaskError> {
        let mime_type = context.current_element().mime_type.clone();

        context.recorder().begin_new_step("Preparing local copy");
        let Some(source) = context.current_target().cloned() else {
            return Err(context.fail(BorrowErrorCode::ContentCopyFailed, "no content location"));
        };
        let handle = context.format_handle_for(&mime_type)?;
        let prepared = context.temp_file_for(&source).await;
        let temp = match prepared {
            Ok(path) => path,
            Err(e) => return Err(context.persistence_failed("temporary copy", e)),
        };
        context.recorder().current_step_succeeded("Ready");

        context.recorder().begin_new_step(format!("Copying {source}"));
        let copied = {
            let ctx: &BorrowContext = context;
            let resolver = ctx.resolver();
            let cancel = ctx.cancellation().clone();
            let mut throttle = ProgressThrottle::new(ctx.config().progress.window);
            let mut progress = |received: u64, expected: Option<u64>| {
                if let Some(sample) = throttle.sample(ctx.now(), received, expected) {
                    ctx.book_download_is_running(
                        sample.received,
                        sample.expected,
                        sample.units_per_second,
                        "Copying",
                    );
                }
            };
            resolver
                .resolve_to_file(&source, &temp, &cancel, &mut progress)
                .await
        };
        match copied {
            Ok(Some(bytes)) => {
                tracing::debug!(book_id = %context.book_id(), bytes, "local content copied");
            }
            Ok(None) => return Err(context.cancelled()),
            Err(e) => {
                return Err(context.fail_with(
                    BorrowErrorCode::ContentCopyFailed,
                    format!("could not copy {source}"),
                    e,
                ));
            }
        }
        context.recorder().current_step_succeeded("Copied");

        context.recorder().begin_new_step("Saving book");
        let saved = {
            let handle = handle.clone();
            let temp = temp.clone();
            run_blocking(move || handle.copy_in_book_with_drm(&temp, DrmKind::None)).await
        };
        remove_quietly(&temp).await;
        if let Err(e) = saved {
            return Err(context.persistence_failed("copied book", e));
        }
        context.recorder().current_step_succeeded("Saved");
        context.book_download_succeeded();
        Ok(())
    }
}

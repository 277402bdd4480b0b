//! Audio book manifest fulfillment

use super::require_target;
use crate::borrow::context::BorrowContext;
use crate::borrow::directory::{Subtask, SubtaskFactory};
use crate::error::{BorrowErrorCode, SubtaskError};
use crate::mime::MimeType;
use crate::types::AccountState;
use async_trait::async_trait;
use url::Url;

/// Fetches an audio book manifest and stores it with its source URI
#[derive(Clone, Copy, Debug, Default)]
pub struct AudioBookManifestFactory;

impl SubtaskFactory for AudioBookManifestFactory {
    fn name(&self) -> &'static str {
        "audiobook_manifest"
    }

    fn is_applicable_for(
        &self,
        mime_type: &MimeType,
        _target: Option<&Url>,
        _account: Option<&AccountState>,
    ) -> bool {
        mime_type.is_audiobook_manifest()
    }

    fn create(&self) -> Box<dyn Subtask> {
        Box::new(AudioBookManifest)
    }
}

struct AudioBookManifest;

#[async_trait]
impl Subtask for AudioBookManifest {
    async fn execute(&mut self, context: &mut BorrowContext) -> Result<(), SubtaskError> {
        let mime_type = context.current_element().mime_type.clone();

        context.recorder().begin_new_step("Checking audio book support");
        let target = require_target(context)?;
        let handle = context.format_handle_for(&mime_type)?;
        let Some(audiobook) = handle.as_audiobook().cloned() else {
            return Err(context.fail(
                BorrowErrorCode::NoFormatHandle,
                format!("{} cannot store an audio book manifest", handle.definition()),
            ));
        };
        context.recorder().current_step_succeeded("Audio books supported");
        context.check_cancelled()?;

        context.recorder().begin_new_step("Fetching audio book manifest");
        let response = context
            .fetch_document(target.clone(), BorrowErrorCode::HttpRequestFailed)
            .await?;
        match serde_json::from_slice::<serde_json::Value>(&response.body) {
            Ok(value) if value.is_object() => {}
            Ok(_) => {
                return Err(context.fail(
                    BorrowErrorCode::AudioBookManifestInvalid,
                    "the manifest is not a JSON object",
                ));
            }
            Err(e) => {
                return Err(context.fail_with(
                    BorrowErrorCode::AudioBookManifestInvalid,
                    "the manifest is not valid JSON",
                    e,
                ));
            }
        }
        context.recorder().current_step_succeeded("Manifest fetched");

        context.recorder().begin_new_step("Saving audio book manifest");
        if let Err(e) = audiobook.copy_in_manifest_and_uri(&response.body, &response.final_url) {
            return Err(context.persistence_failed("audio book manifest", e));
        }
        context.recorder().current_step_succeeded("Saved");
        context.book_download_succeeded();
        Ok(())
    }
}

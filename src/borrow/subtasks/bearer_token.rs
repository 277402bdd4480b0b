//! Bearer-token passthrough

use super::require_target;
use crate::borrow::context::BorrowContext;
use crate::borrow::directory::{Subtask, SubtaskFactory};
use crate::error::{BorrowErrorCode, SubtaskError};
use crate::mime::{self, MimeType};
use crate::types::AccountState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

/// Simplified bearer-token document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BearerTokenDocument {
    /// Token to send with the next request
    pub access_token: String,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Where the content lives
    pub location: Url,
}

/// Fetches a bearer token and continues at the location it names
#[derive(Clone, Copy, Debug, Default)]
pub struct BearerTokenFactory;

impl SubtaskFactory for BearerTokenFactory {
    fn name(&self) -> &'static str {
        "bearer_token"
    }

    fn is_applicable_for(
        &self,
        mime_type: &MimeType,
        _target: Option<&Url>,
        _account: Option<&AccountState>,
    ) -> bool {
        mime_type.is(mime::BEARER_TOKEN)
    }

    fn create(&self) -> Box<dyn Subtask> {
        Box::new(BearerToken)
    }
}

struct BearerToken;

#[async_trait]
impl Subtask for BearerToken {
    async fn execute(&mut self, context: &mut BorrowContext) -> Result<(), SubtaskError> {
        context.recorder().begin_new_step("Fetching bearer token");
        let target = require_target(context)?;
        let response = context
            .fetch_document(target, BorrowErrorCode::HttpRequestFailed)
            .await?;

        let document: BearerTokenDocument = match serde_json::from_slice(&response.body) {
            Ok(document) => document,
            Err(e) => {
                return Err(context.fail_with(
                    BorrowErrorCode::BearerTokenInvalid,
                    "the bearer token document could not be parsed",
                    e,
                ));
            }
        };
        if document.access_token.is_empty() {
            return Err(context.fail(BorrowErrorCode::BearerTokenInvalid, "the bearer token is empty"));
        }

        tracing::debug!(
            book_id = %context.book_id(),
            expires_in = ?document.expires_in,
            "bearer token received"
        );
        context.set_bearer_token(document.access_token);
        context.recorder().current_step_succeeded("Bearer token received");
        context.received_new_uri(document.location);
        Ok(())
    }
}

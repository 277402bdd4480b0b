//! Download authenticated with a SAML 2.0 session

use super::direct_download::{DirectDownload, is_direct_download};
use crate::borrow::directory::{Subtask, SubtaskFactory};
use crate::mime::MimeType;
use crate::types::AccountState;
use url::Url;

/// Direct download for accounts signed in through a SAML identity provider
///
/// Requests carry the SAML bearer token and identity-provider cookies. When
/// the session has expired the provider answers with its login page, which
/// halts the borrow until the user authenticates.
#[derive(Clone, Copy, Debug, Default)]
pub struct SamlDownloadFactory;

impl SubtaskFactory for SamlDownloadFactory {
    fn name(&self) -> &'static str {
        "saml_download"
    }

    fn is_applicable_for(
        &self,
        mime_type: &MimeType,
        target: Option<&Url>,
        account: Option<&AccountState>,
    ) -> bool {
        account.is_some_and(AccountState::is_saml) && is_direct_download(mime_type, target)
    }

    fn create(&self) -> Box<dyn Subtask> {
        Box::new(DirectDownload { saml: true })
    }
}

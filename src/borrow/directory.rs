//! Registry of subtask factories consulted by the walker

use super::context::BorrowContext;
use super::subtasks::{
    AcsmFactory, AudioBookManifestFactory, AxisNowFactory, BearerTokenFactory, ContentCopyFactory,
    DirectDownloadFactory, LoanCreationFactory, SamlDownloadFactory,
};
use crate::error::SubtaskError;
use crate::mime::MimeType;
use crate::types::AccountState;
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

/// One execution of a subtask against one path element
///
/// `Ok(())` means the element was handled: the subtask either called
/// [`received_new_uri`](BorrowContext::received_new_uri) to continue the walk
/// or [`book_download_succeeded`](BorrowContext::book_download_succeeded) to
/// finish it.
#[async_trait]
pub trait Subtask: Send {
    /// Process the current element
    async fn execute(&mut self, context: &mut BorrowContext) -> Result<(), SubtaskError>;
}

/// Stateless factory deciding applicability and creating subtasks
pub trait SubtaskFactory: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Whether this subtask handles an element of `mime_type` fetched from `target`
    fn is_applicable_for(
        &self,
        mime_type: &MimeType,
        target: Option<&Url>,
        account: Option<&AccountState>,
    ) -> bool;

    /// Create an instance for one execution
    fn create(&self) -> Box<dyn Subtask>;
}

/// Ordered table of subtask factories
///
/// The first applicable factory wins, so account-aware variants must be
/// registered ahead of their generic equivalents.
#[derive(Clone)]
pub struct SubtaskDirectory {
    factories: Vec<Arc<dyn SubtaskFactory>>,
}

impl std::fmt::Debug for SubtaskDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl Default for SubtaskDirectory {
    fn default() -> Self {
        Self::standard()
    }
}

impl SubtaskDirectory {
    /// A directory with the given factories, in order
    pub fn new(factories: Vec<Arc<dyn SubtaskFactory>>) -> Self {
        Self { factories }
    }

    /// Every subtask this crate ships, in dispatch order
    pub fn standard() -> Self {
        Self::new(vec![
            Arc::new(AcsmFactory),
            Arc::new(AxisNowFactory),
            Arc::new(AudioBookManifestFactory),
            Arc::new(LoanCreationFactory),
            Arc::new(BearerTokenFactory),
            Arc::new(ContentCopyFactory),
            Arc::new(SamlDownloadFactory),
            Arc::new(DirectDownloadFactory),
        ])
    }

    /// Append a factory after the existing ones
    pub fn push(&mut self, factory: Arc<dyn SubtaskFactory>) {
        self.factories.push(factory);
    }

    /// Factory names, in dispatch order
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.iter().map(|f| f.name()).collect()
    }

    /// The first factory applicable to the element
    pub fn find(
        &self,
        mime_type: &MimeType,
        target: Option<&Url>,
        account: Option<&AccountState>,
    ) -> Option<Arc<dyn SubtaskFactory>> {
        self.factories
            .iter()
            .find(|f| f.is_applicable_for(mime_type, target, account))
            .cloned()
    }
}

//! Walks an acquisition path, one subtask per element

use super::context::{BorrowContext, BorrowServices};
use super::directory::SubtaskDirectory;
use crate::acquisition::AcquisitionPath;
use crate::database::BookDatabaseEntry;
use crate::error::{BorrowErrorCode, SubtaskError};
use crate::recorder::{TaskRecorder, TaskStep};
use crate::types::{AccountState, BookId, BookStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a borrow ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BorrowOutcome {
    /// Every element was processed
    Completed,
    /// A subtask stopped the walk without failing (holds, DRM fulfillment, login required)
    HaltedEarly,
    /// The borrow was cancelled
    Cancelled,
    /// A subtask failed
    Failed {
        /// Reserved code
        code: BorrowErrorCode,
        /// Human-readable message
        message: String,
    },
}

/// Outcome of a borrow plus everything recorded on the way
#[derive(Clone, Debug)]
pub struct BorrowResult {
    /// The book borrowed
    pub book_id: BookId,
    /// How the walk ended
    pub outcome: BorrowOutcome,
    /// Recorded steps in order
    pub steps: Vec<TaskStep>,
    /// Recorded attributes
    pub attributes: BTreeMap<String, String>,
}

impl BorrowResult {
    /// True unless the walk failed or was cancelled
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            BorrowOutcome::Completed | BorrowOutcome::HaltedEarly
        )
    }

    /// The most recent failed step
    pub fn last_failed_step(&self) -> Option<&TaskStep> {
        self.steps.iter().rev().find(|s| s.is_failed())
    }
}

/// Runs borrows
///
/// # Example
///
/// ```no_run
/// use book_borrow::borrow::{Borrower, BorrowServices, ReqwestHttpClient};
/// use book_borrow::{AcquisitionPath, AccountState, BookDatabaseEntry, BookRegistry, Config};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(entry: Arc<BookDatabaseEntry>, account: AccountState, path: AcquisitionPath) -> book_borrow::Result<()> {
/// let config = Arc::new(Config::default());
/// let http = Arc::new(ReqwestHttpClient::new(&config.http)?);
/// let borrower = Borrower::new(BorrowServices::new(config, http, BookRegistry::new()));
///
/// let result = borrower.borrow(entry, account, path, CancellationToken::new()).await;
/// println!("{:?}", result.outcome);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Borrower {
    services: BorrowServices,
    directory: Arc<SubtaskDirectory>,
}

impl Borrower {
    /// A borrower dispatching through the standard subtask directory
    pub fn new(services: BorrowServices) -> Self {
        Self::with_directory(services, SubtaskDirectory::standard())
    }

    /// A borrower dispatching through a custom directory
    pub fn with_directory(services: BorrowServices, directory: SubtaskDirectory) -> Self {
        Self {
            services,
            directory: Arc::new(directory),
        }
    }

    /// The shared collaborators
    pub fn services(&self) -> &BorrowServices {
        &self.services
    }

    /// Walk `path` for `entry`
    ///
    /// Each element is handed to the first applicable subtask. The walk ends
    /// when a subtask persists final content, halts early, fails, or the path
    /// runs out. Failures and cancellation are returned in the outcome, never
    /// as errors.
    pub async fn borrow(
        &self,
        entry: Arc<BookDatabaseEntry>,
        account: AccountState,
        path: AcquisitionPath,
        cancel: CancellationToken,
    ) -> BorrowResult {
        let book_id = entry.id().clone();
        tracing::info!(
            book_id = %book_id,
            elements = path.len(),
            final_type = %path.final_content_type(),
            "borrow started"
        );

        let Some((first, rest)) = path.elements().split_first() else {
            return empty_path(book_id);
        };
        let mut context = BorrowContext::new(
            self.services.clone(),
            entry,
            account,
            first.clone(),
            rest.to_vec(),
            cancel,
        );
        context.recorder().add_attribute("book_id", book_id.as_str());
        context
            .recorder()
            .add_attribute("final_type", path.final_content_type().to_string());

        let outcome = self.walk(&mut context).await;
        match &outcome {
            BorrowOutcome::Completed => tracing::info!(book_id = %book_id, "borrow completed"),
            BorrowOutcome::HaltedEarly => tracing::info!(book_id = %book_id, "borrow halted early"),
            BorrowOutcome::Cancelled => {
                self.services
                    .registry
                    .update_status(&book_id, BookStatus::Cancelled);
            }
            BorrowOutcome::Failed { code, .. } => {
                tracing::warn!(book_id = %book_id, code = %code, "borrow failed");
            }
        }

        let (steps, attributes) = context.into_recorder().finish();
        BorrowResult {
            book_id,
            outcome,
            steps,
            attributes,
        }
    }

    async fn walk(&self, context: &mut BorrowContext) -> BorrowOutcome {
        loop {
            if context.check_cancelled().is_err() {
                return BorrowOutcome::Cancelled;
            }

            let element = context.current_element().clone();
            let target = context.current_target().cloned();
            let Some(factory) =
                self.directory
                    .find(&element.mime_type, target.as_ref(), Some(context.account()))
            else {
                context
                    .recorder()
                    .begin_new_step(format!("Finding a handler for {}", element.mime_type));
                let message = format!(
                    "no subtask can handle {} from {}",
                    element.mime_type,
                    target.as_ref().map_or("an unknown location".to_string(), |u| u.to_string())
                );
                return failed(context.fail(BorrowErrorCode::NoSubtaskAvailable, message));
            };

            tracing::info!(
                book_id = %context.book_id(),
                subtask = factory.name(),
                mime_type = %element.mime_type,
                "subtask selected"
            );
            let mut subtask = factory.create();
            match subtask.execute(context).await {
                Ok(()) => {}
                Err(SubtaskError::HaltedEarly) => return BorrowOutcome::HaltedEarly,
                Err(SubtaskError::Cancelled) => return BorrowOutcome::Cancelled,
                Err(e @ SubtaskError::Failed(_)) => return failed(e),
            }

            if context.is_finished() || !context.advance() {
                return BorrowOutcome::Completed;
            }
        }
    }
}

/// Result for a path with nothing to walk
fn empty_path(book_id: BookId) -> BorrowResult {
    let message = "the acquisition path has no elements";
    tracing::warn!(book_id = %book_id, "empty acquisition path");
    let mut recorder = TaskRecorder::new();
    recorder.begin_new_step("Checking acquisition path");
    recorder.current_step_failed(message, BorrowErrorCode::NoSubtaskAvailable, None);
    let (steps, attributes) = recorder.finish();
    BorrowResult {
        book_id,
        outcome: BorrowOutcome::Failed {
            code: BorrowErrorCode::NoSubtaskAvailable,
            message: message.to_string(),
        },
        steps,
        attributes,
    }
}

fn failed(error: SubtaskError) -> BorrowOutcome {
    match error {
        SubtaskError::Failed(failure) => BorrowOutcome::Failed {
            code: failure.code,
            message: failure.message,
        },
        SubtaskError::HaltedEarly => BorrowOutcome::HaltedEarly,
        SubtaskError::Cancelled => BorrowOutcome::Cancelled,
    }
}

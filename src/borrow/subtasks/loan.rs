//! OPDS loan creation

use super::require_target;
use crate::acquisition::{AcquisitionPath, AcquisitionPathElement, Availability, FeedEntry};
use crate::borrow::context::BorrowContext;
use crate::borrow::directory::{Subtask, SubtaskFactory};
use crate::error::{BorrowErrorCode, SubtaskError};
use crate::mime::MimeType;
use crate::types::AccountState;
use async_trait::async_trait;
use url::Url;

/// Requests a loan through the entry's borrow link
#[derive(Clone, Copy, Debug, Default)]
pub struct LoanCreationFactory;

impl SubtaskFactory for LoanCreationFactory {
    fn name(&self) -> &'static str {
        "loan_creation"
    }

    fn is_applicable_for(
        &self,
        mime_type: &MimeType,
        _target: Option<&Url>,
        _account: Option<&AccountState>,
    ) -> bool {
        mime_type.is_opds_entry()
    }

    fn create(&self) -> Box<dyn Subtask> {
        Box::new(LoanCreation)
    }
}

struct LoanCreation;

#[async_trait]
impl Subtask for LoanCreation {
    async fn execute(&mut self, context: &mut BorrowContext) -> Result<(), SubtaskError> {
        context.recorder().begin_new_step("Requesting loan");
        context.book_loan_is_requesting();
        let target = require_target(context)?;
        let response = context
            .fetch_document(target, BorrowErrorCode::LoanFailed)
            .await?;
        context.recorder().current_step_succeeded("Loan response received");

        context.recorder().begin_new_step("Reading loan response");
        let entry = match context.parser().parse(&response.body) {
            Ok(entry) => entry,
            Err(e) => {
                return Err(context.fail_with(
                    BorrowErrorCode::LoanParseFailed,
                    "the loan response could not be parsed",
                    e,
                ));
            }
        };
        let availability = entry.availability.clone();
        let next_uri = continuation(&entry, context.remaining_path());
        if let Err(e) = context.entry().write_feed_entry(entry) {
            return Err(context.persistence_failed("loan entry", e));
        }
        context.recorder().current_step_succeeded("Loan entry saved");

        match availability {
            Availability::Held { position, .. } => {
                tracing::info!(book_id = %context.book_id(), ?position, "book placed on hold");
                context.book_is_held(position);
                Err(SubtaskError::HaltedEarly)
            }
            Availability::Holdable => {
                context.book_is_held(None);
                Err(SubtaskError::HaltedEarly)
            }
            Availability::HoldReady { .. } => {
                context.book_hold_is_ready();
                Err(SubtaskError::HaltedEarly)
            }
            Availability::Loaned { .. } | Availability::OpenAccess => {
                tracing::info!(book_id = %context.book_id(), "loan granted");
                context.book_reached_loan();
                if context.next_element().is_none() {
                    return Ok(());
                }
                context.recorder().begin_new_step("Finding acquisition for the loan");
                match next_uri {
                    Some(uri) => {
                        context.recorder().current_step_succeeded(format!("Continuing at {uri}"));
                        context.received_new_uri(uri);
                        Ok(())
                    }
                    None => Err(context.fail(
                        BorrowErrorCode::LoanMissingAcquisition,
                        "the loan does not offer the requested format",
                    )),
                }
            }
            Availability::Loanable | Availability::Revoked | Availability::Unavailable => {
                context.recorder().begin_new_step("Checking loan status");
                Err(context.fail(BorrowErrorCode::LoanFailed, "the loan was not granted"))
            }
        }
    }
}

/// The href of the acquisition that continues the remaining path
///
/// An acquisition whose linearized path matches every remaining type wins;
/// otherwise the first whose own type matches the next element is used.
fn continuation(entry: &FeedEntry, remaining: &[AcquisitionPathElement]) -> Option<Url> {
    let next = remaining.first()?;
    let candidates: Vec<(&Url, AcquisitionPath)> = entry
        .acquisitions
        .iter()
        .flat_map(|a| {
            AcquisitionPath::linearize(a)
                .into_iter()
                .map(move |path| (&a.href, path))
        })
        .collect();

    let full = candidates.iter().find(|(_, path)| {
        path.len() == remaining.len()
            && path
                .elements()
                .iter()
                .zip(remaining)
                .all(|(a, b)| a.mime_type.is_compatible_with(&b.mime_type))
    });
    full.or_else(|| {
        candidates
            .iter()
            .find(|(_, path)| {
                path.elements()
                    .first()
                    .is_some_and(|first| first.mime_type.is_compatible_with(&next.mime_type))
            })
    })
    .map(|(href, _)| (*href).clone())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{Acquisition, AcquisitionRelation, IndirectAcquisition};
    use chrono::Utc;

    fn acquisition(href: &str, mime_type: MimeType, indirect: Vec<MimeType>) -> Acquisition {
        Acquisition {
            relation: AcquisitionRelation::Generic,
            href: Url::parse(href).unwrap(),
            mime_type,
            indirect: indirect
                .into_iter()
                .map(|m| IndirectAcquisition { mime_type: m, indirect: vec![] })
                .collect(),
        }
    }

    fn entry(acquisitions: Vec<Acquisition>) -> FeedEntry {
        FeedEntry {
            id: "urn:loan".into(),
            title: "Loaned".into(),
            authors: vec![],
            updated: Utc::now(),
            availability: Availability::Loaned { start: None, end: None },
            acquisitions,
        }
    }

    fn element(mime_type: MimeType) -> AcquisitionPathElement {
        AcquisitionPathElement::new(None, mime_type)
    }

    #[test]
    fn prefers_full_path_match() {
        let entry = entry(vec![
            acquisition("https://x/pdf", MimeType::acsm(), vec![MimeType::pdf()]),
            acquisition("https://x/epub", MimeType::acsm(), vec![MimeType::epub()]),
        ]);
        let remaining = [element(MimeType::acsm()), element(MimeType::epub())];
        assert_eq!(
            continuation(&entry, &remaining).unwrap().as_str(),
            "https://x/epub"
        );
    }

    #[test]
    fn falls_back_to_first_type_match() {
        let entry = entry(vec![acquisition("https://x/book", MimeType::epub(), vec![])]);
        let remaining = [element(MimeType::epub()), element(MimeType::pdf())];
        assert_eq!(
            continuation(&entry, &remaining).unwrap().as_str(),
            "https://x/book"
        );
    }

    #[test]
    fn none_when_nothing_matches() {
        let entry = entry(vec![acquisition("https://x/book", MimeType::pdf(), vec![])]);
        assert!(continuation(&entry, &[element(MimeType::epub())]).is_none());
        assert!(continuation(&entry, &[]).is_none());
    }
}

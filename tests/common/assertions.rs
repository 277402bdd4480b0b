//! Assertions over on-disk state and published statuses

use book_borrow::borrow::{BorrowOutcome, BorrowResult};
use book_borrow::recorder::TaskStepResolution;
use book_borrow::{BookId, BookRegistry, BookStatus, BookStatusEvent, BorrowErrorCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;

/// Every regular file under `root`, relative to it, sorted
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
        .collect();
    files.sort();
    files
}

/// File names (last component) under `root`
pub fn file_names_under(root: &Path) -> Vec<String> {
    files_under(root)
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .collect()
}

/// Assert the borrow failed with `code`, and that the last failed step carries it
pub fn assert_failed_with(result: &BorrowResult, code: BorrowErrorCode) {
    match &result.outcome {
        BorrowOutcome::Failed { code: actual, .. } => assert_eq!(*actual, code, "{result:#?}"),
        other => panic!("expected failure {code}, got {other:?}"),
    }
    let step = result.last_failed_step().expect("a failed step");
    match &step.resolution {
        TaskStepResolution::Failed { code: step_code, .. } => assert_eq!(*step_code, code),
        other => panic!("unexpected resolution {other:?}"),
    }
}

/// Drain every status already published for `id`
pub fn drain_statuses(events: &mut broadcast::Receiver<BookStatusEvent>, id: &BookId) -> Vec<BookStatus> {
    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        if &event.id == id {
            statuses.push(event.status);
        }
    }
    statuses
}

/// Wait until the registry reports a status satisfying `predicate`
pub async fn wait_for_status<F>(
    registry: &BookRegistry,
    id: &BookId,
    timeout: Duration,
    predicate: F,
) -> Option<BookStatus>
where
    F: Fn(&BookStatus) -> bool,
{
    let mut events = registry.subscribe();
    if let Some(current) = registry.status(id) {
        if predicate(&current) {
            return Some(current);
        }
    }
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if &event.id == id && predicate(&event.status) => return Some(event.status),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    })
    .await;
    result.ok().flatten()
}

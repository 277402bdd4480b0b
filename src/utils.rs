//! Small helpers shared across modules

use crate::error::Result;
use rand::Rng;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tokio::task::spawn_blocking;
use url::Url;

/// Lock a mutex, recovering the data if a previous holder panicked
///
/// Snapshots behind these locks are replaced wholesale, so a poisoned lock
/// still holds a consistent value.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run synchronous file work on the blocking pool
///
/// Whole-book copies end in `sync_all`, which must not stall a runtime worker.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(work)
        .await
        .map_err(|e| io::Error::other(format!("file task failed: {e}")))?
}

/// A fresh, unused file path inside `dir` for an in-flight download
///
/// The name combines a random component with the last URL path segment so
/// that leftovers are recognizable when inspecting the temp directory.
pub fn temp_download_path(dir: &Path, source: &Url) -> PathBuf {
    let suffix: u64 = rand::thread_rng().r#gen();
    let stem = filename_from_url(source);
    dir.join(format!("{suffix:016x}-{stem}"))
}

/// Last non-empty path segment of a URL, or `download` when there is none
///
/// Only characters that are safe in file names on every platform are kept.
pub fn filename_from_url(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .unwrap_or("download");
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "download".to_string()
    } else {
        cleaned
    }
}

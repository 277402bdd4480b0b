//! In-memory file store for tests.

use super::FileStore;
use crate::utils::lock;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
    failing_writes: BTreeSet<PathBuf>,
    failing_deletes: BTreeSet<PathBuf>,
}

/// In-memory [`FileStore`]
///
/// Directories must exist before files are written into them, matching the
/// local filesystem. Individual paths can be made to fail on write or delete
/// to exercise error paths.
///
/// # Examples
///
/// ```
/// use book_borrow::storage::{FileStore, MemoryFileStore};
/// use std::path::Path;
///
/// let store = MemoryFileStore::new();
/// store.create_dir_all(Path::new("/books/a")).unwrap();
/// store.write_atomic(Path::new("/books/a/meta.json"), b"{}").unwrap();
/// assert!(store.exists(Path::new("/books/a/meta.json")));
/// ```
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    state: Mutex<MemoryState>,
}

impl MemoryFileStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write or copy to `path` fail
    pub fn fail_writes_to(&self, path: impl Into<PathBuf>) {
        lock(&self.state).failing_writes.insert(path.into());
    }

    /// Make every subsequent delete of `path` fail
    pub fn fail_deletes_to(&self, path: impl Into<PathBuf>) {
        lock(&self.state).failing_deletes.insert(path.into());
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        let mut state = lock(&self.state);
        state.failing_writes.clear();
        state.failing_deletes.clear();
    }

    /// Paths of all stored files, sorted
    pub fn files(&self) -> Vec<PathBuf> {
        lock(&self.state).files.keys().cloned().collect()
    }

    fn store(&self, path: &Path, data: Vec<u8>) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.failing_writes.contains(path) {
            return Err(io::Error::other(format!(
                "injected write failure for {}",
                path.display()
            )));
        }
        let parent_exists = path
            .parent()
            .is_none_or(|p| p.as_os_str().is_empty() || state.dirs.contains(p));
        if !parent_exists {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("parent directory of {} does not exist", path.display()),
            ));
        }
        state.files.insert(path.to_path_buf(), data);
        Ok(())
    }
}

impl FileStore for MemoryFileStore {
    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        Ok(lock(&self.state).files.get(path).cloned())
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.store(path, data.to_vec())
    }

    fn copy_in(&self, source: &Path, destination: &Path) -> io::Result<()> {
        let in_memory = lock(&self.state).files.get(source).cloned();
        let data = match in_memory {
            Some(data) => data,
            None => std::fs::read(source)?,
        };
        self.store(destination, data)
    }

    fn exists(&self, path: &Path) -> bool {
        let state = lock(&self.state);
        state.files.contains_key(path) || state.dirs.contains(path)
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.failing_deletes.contains(path) {
            return Err(io::Error::other(format!(
                "injected delete failure for {}",
                path.display()
            )));
        }
        state.files.remove(path);
        state.files.remove(&super::temp_sibling(path));
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = lock(&self.state);
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            state.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn list_dirs(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let state = lock(&self.state);
        Ok(state
            .dirs
            .iter()
            .filter(|d| d.parent() == Some(path))
            .cloned()
            .collect())
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.failing_deletes.contains(path) {
            return Err(io::Error::other(format!(
                "injected delete failure for {}",
                path.display()
            )));
        }
        state.files.retain(|p, _| !p.starts_with(path));
        state.dirs.retain(|d| !d.starts_with(path));
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_requires_parent_directory() {
        let store = MemoryFileStore::new();
        assert!(store.write_atomic(Path::new("/a/b"), b"x").is_err());
        store.create_dir_all(Path::new("/a")).unwrap();
        store.write_atomic(Path::new("/a/b"), b"x").unwrap();
        assert_eq!(store.read(Path::new("/a/b")).unwrap().unwrap(), b"x");
    }

    #[test]
    fn injected_failures_leave_previous_content() {
        let store = MemoryFileStore::new();
        store.create_dir_all(Path::new("/a")).unwrap();
        store.write_atomic(Path::new("/a/f"), b"old").unwrap();
        store.fail_writes_to("/a/f");

        assert!(store.write_atomic(Path::new("/a/f"), b"new").is_err());
        assert_eq!(store.read(Path::new("/a/f")).unwrap().unwrap(), b"old");

        store.clear_failures();
        store.write_atomic(Path::new("/a/f"), b"new").unwrap();
        assert_eq!(store.read(Path::new("/a/f")).unwrap().unwrap(), b"new");
    }

    #[test]
    fn list_and_remove_directories() {
        let store = MemoryFileStore::new();
        store.create_dir_all(Path::new("/books/x")).unwrap();
        store.create_dir_all(Path::new("/books/y/nested")).unwrap();
        store.write_atomic(Path::new("/books/x/meta.json"), b"{}").unwrap();

        assert_eq!(
            store.list_dirs(Path::new("/books")).unwrap(),
            vec![PathBuf::from("/books/x"), PathBuf::from("/books/y")]
        );

        store.remove_dir_all(Path::new("/books/x")).unwrap();
        assert!(!store.exists(Path::new("/books/x")));
        assert!(!store.exists(Path::new("/books/x/meta.json")));
        assert!(store.exists(Path::new("/books/y/nested")));
    }
}

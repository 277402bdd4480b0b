//! File capability layer used by the book database.
//!
//! Format and DRM handles never touch the filesystem directly; they go
//! through a [`FileStore`], which keeps every write atomic (write to a `.tmp`
//! sibling, then rename) and lets tests substitute [`MemoryFileStore`].

mod local;
mod memory;

pub use self::local::LocalFileStore;
pub use self::memory::MemoryFileStore;

use std::io;
use std::path::{Path, PathBuf};

/// Narrow file interface: read, atomic write, copy-in, delete, list.
///
/// Paths are absolute (or rooted in the store's namespace); implementations do
/// not resolve them against a base directory.
pub trait FileStore: Send + Sync + std::fmt::Debug {
    /// Read a whole file, `None` if it does not exist
    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>>;

    /// Replace `path` with `data`; readers see either the old or the new content
    fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Atomically replace `destination` with the contents of the local file `source`
    fn copy_in(&self, source: &Path, destination: &Path) -> io::Result<()>;

    /// True if a file or directory exists at `path`
    fn exists(&self, path: &Path) -> bool;

    /// Delete a file and any stale `.tmp` sibling; absent files are not an error
    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Create a directory and its parents
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Immediate subdirectories of `path`; a missing directory lists as empty
    fn list_dirs(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Remove a directory tree; absent directories are not an error
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// The `.tmp` sibling used while writing `path`
pub fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read a UTF-8 text file, trimming surrounding whitespace
pub fn read_text(store: &dyn FileStore, path: &Path) -> io::Result<Option<String>> {
    match store.read(path)? {
        Some(bytes) => String::from_utf8(bytes)
            .map(|s| Some(s.trim().to_string()))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        None => Ok(None),
    }
}

//! Local filesystem file store.

use super::{FileStore, temp_sibling};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// [`FileStore`] backed by the local filesystem
///
/// Writes go to a `.tmp` sibling which is synced and then renamed over the
/// destination, so a crash mid-write leaves the previous file intact.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFileStore;

impl LocalFileStore {
    /// Create a local file store
    pub fn new() -> Self {
        Self
    }

    fn ignore_not_found(result: io::Result<()>) -> io::Result<()> {
        match result {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

impl FileStore for LocalFileStore {
    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let tmp = temp_sibling(path);
        let result = (|| {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn copy_in(&self, source: &Path, destination: &Path) -> io::Result<()> {
        let tmp = temp_sibling(destination);
        let result = (|| {
            fs::copy(source, &tmp)?;
            fs::File::open(&tmp)?.sync_all()?;
            fs::rename(&tmp, destination)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        Self::ignore_not_found(fs::remove_file(path))?;
        Self::ignore_not_found(fs::remove_file(temp_sibling(path)))
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn list_dirs(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        Self::ignore_not_found(fs::remove_dir_all(path))
    }
}

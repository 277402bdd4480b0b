//! EPUB format handle

use super::serialization::{BOOKMARKS, Bookmark, LAST_READ_LOCATION};
use super::{BookFiles, forward_to, load_document, save_document};
use crate::drm::{DrmHandle, DrmInformation, DrmKind, OnUpdate};
use crate::error::Result;
use crate::storage::FileStore;
use crate::utils::lock;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

/// Snapshot of an EPUB format
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EpubFormat {
    /// The book file, once downloaded
    pub file: Option<PathBuf>,
    /// DRM protecting the book file
    pub drm_info: DrmInformation,
    /// Where the reader left off
    pub last_read_location: Option<Bookmark>,
    /// User bookmarks
    pub bookmarks: Vec<Bookmark>,
}

struct EpubState {
    drm: DrmHandle,
    snapshot: Arc<EpubFormat>,
}

/// Handle over the EPUB files of one book
pub struct EpubHandle {
    files: BookFiles,
    last_read_path: PathBuf,
    bookmarks_path: PathBuf,
    state: Mutex<EpubState>,
    on_update: OnUpdate,
    me: Weak<EpubHandle>,
}

impl fmt::Debug for EpubHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpubHandle")
            .field("files", &self.files)
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl EpubHandle {
    pub(crate) fn open(
        store: Arc<dyn FileStore>,
        directory: &Path,
        on_update: OnUpdate,
    ) -> Result<Arc<Self>> {
        let files = BookFiles::new(store, directory, "epub", "epub-book.epub");
        let last_read_path = directory.join("epub-meta_last_read.json");
        let bookmarks_path = directory.join("epub-meta_bookmarks.json");

        let last_read_location = load_document(files.store(), &last_read_path, &LAST_READ_LOCATION)?;
        let bookmarks =
            load_document(files.store(), &bookmarks_path, &BOOKMARKS)?.unwrap_or_default();
        let file = files.existing_book();

        let mut drm_failure = None;
        let handle = Arc::new_cyclic(|me: &Weak<Self>| {
            let drm = match files.open_drm(forward_to(me.clone(), Self::drm_changed)) {
                Ok(drm) => drm,
                Err(e) => {
                    drm_failure = Some(e);
                    DrmHandle::None
                }
            };
            let snapshot = Arc::new(EpubFormat {
                file,
                drm_info: drm.snapshot(),
                last_read_location,
                bookmarks,
            });
            Self {
                files,
                last_read_path,
                bookmarks_path,
                state: Mutex::new(EpubState { drm, snapshot }),
                on_update,
                me: me.clone(),
            }
        });
        match drm_failure {
            Some(e) => Err(e),
            None => Ok(handle),
        }
    }

    /// Current state
    pub fn snapshot(&self) -> Arc<EpubFormat> {
        lock(&self.state).snapshot.clone()
    }

    /// The active DRM handle
    pub fn drm(&self) -> DrmHandle {
        lock(&self.state).drm.clone()
    }

    /// Replace the book file with a copy of `source`
    pub fn copy_in_book(&self, source: &Path) -> Result<()> {
        self.update(|files, _, next| {
            next.file = Some(files.copy_in(source)?);
            Ok(())
        })
    }

    /// Record where the reader left off, or clear it
    pub fn set_last_read_location(&self, location: Option<Bookmark>) -> Result<()> {
        self.update(|files, _, next| {
            save_document(
                files.store(),
                &self.last_read_path,
                &LAST_READ_LOCATION,
                location.as_ref(),
            )?;
            next.last_read_location = location;
            Ok(())
        })
    }

    /// Replace the bookmark list
    pub fn set_bookmarks(&self, bookmarks: Vec<Bookmark>) -> Result<()> {
        self.update(|files, _, next| {
            save_document(files.store(), &self.bookmarks_path, &BOOKMARKS, Some(&bookmarks))?;
            next.bookmarks = bookmarks;
            Ok(())
        })
    }

    /// Replace the book file with a copy of `source` protected by `kind`
    ///
    /// One snapshot is published either way. After a failure it is rebuilt
    /// from what reached disk.
    pub fn copy_in_book_with_drm(&self, source: &Path, kind: DrmKind) -> Result<()> {
        let on_drm = forward_to(self.me.clone(), Self::drm_changed);
        let result = {
            let mut state = lock(&self.state);
            let mut next = (*state.snapshot).clone();
            let installed = self.files.install_book(&mut state.drm, kind, source, on_drm);
            next.file = match &installed {
                Ok(path) => Some(path.clone()),
                Err(_) => self.files.existing_book(),
            };
            next.drm_info = state.drm.snapshot();
            state.snapshot = Arc::new(next);
            installed.map(|_| ())
        };
        (self.on_update)();
        result
    }

    /// Switch the active DRM kind, deleting the previous kind's artifacts
    pub fn set_drm_kind(&self, kind: DrmKind) -> Result<()> {
        let on_drm = forward_to(self.me.clone(), Self::drm_changed);
        self.update(|files, drm, next| {
            if drm.kind() != kind {
                *drm = files.switch_drm(drm, kind, on_drm)?;
            }
            next.drm_info = drm.snapshot();
            Ok(())
        })
    }

    /// Delete the book file and DRM artifacts; reading position and bookmarks stay
    pub fn delete_book_data(&self) -> Result<()> {
        self.update(|files, drm, next| {
            files.delete_book_data()?;
            *drm = DrmHandle::None;
            next.file = None;
            next.drm_info = DrmInformation::None;
            Ok(())
        })
    }

    /// Apply a mutation under the lock, then notify with the lock released
    fn update(
        &self,
        mutate: impl FnOnce(&BookFiles, &mut DrmHandle, &mut EpubFormat) -> Result<()>,
    ) -> Result<()> {
        {
            let mut state = lock(&self.state);
            let mut next = (*state.snapshot).clone();
            mutate(&self.files, &mut state.drm, &mut next)?;
            state.snapshot = Arc::new(next);
        }
        (self.on_update)();
        Ok(())
    }

    fn drm_changed(&self) {
        {
            let mut state = lock(&self.state);
            let mut next = (*state.snapshot).clone();
            next.drm_info = state.drm.snapshot();
            state.snapshot = Arc::new(next);
        }
        (self.on_update)();
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drm::{AdobeLoan, AdobeRightsUpdate, no_update};
    use crate::storage::{LocalFileStore, MemoryFileStore};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn open(dir: &Path) -> Arc<EpubHandle> {
        EpubHandle::open(Arc::new(LocalFileStore::new()), dir, no_update()).unwrap()
    }

    fn bookmark(location: &str) -> Bookmark {
        Bookmark {
            location: location.into(),
            time: Utc::now(),
            chapter_title: None,
            book_progress: None,
        }
    }

    #[test]
    fn empty_directory_opens_empty() {
        let dir = tempdir().unwrap();
        let handle = open(dir.path());
        assert_eq!(*handle.snapshot(), EpubFormat::default());
    }

    #[test]
    fn repeated_copy_and_delete_keeps_last_content() {
        let dir = tempdir().unwrap();
        let handle = open(dir.path());
        let source = dir.path().join("download");

        for round in 0..5 {
            std::fs::write(&source, format!("content {round}")).unwrap();
            handle.copy_in_book(&source).unwrap();
            if round < 4 {
                handle.delete_book_data().unwrap();
                assert!(handle.snapshot().file.is_none());
            }
        }

        let file = handle.snapshot().file.clone().unwrap();
        assert_eq!(std::fs::read_to_string(file).unwrap(), "content 4");
    }

    #[test]
    fn delete_keeps_reading_state() {
        let dir = tempdir().unwrap();
        let handle = open(dir.path());
        let source = dir.path().join("download");
        std::fs::write(&source, b"book").unwrap();

        handle.copy_in_book(&source).unwrap();
        handle.set_last_read_location(Some(bookmark("a"))).unwrap();
        handle.set_bookmarks(vec![bookmark("b"), bookmark("c")]).unwrap();
        handle.set_drm_kind(DrmKind::Lcp).unwrap();
        handle.delete_book_data().unwrap();

        let snapshot = handle.snapshot();
        assert!(snapshot.file.is_none());
        assert_eq!(snapshot.drm_info, DrmInformation::None);
        assert_eq!(snapshot.last_read_location.as_ref().unwrap().location, "a");
        assert_eq!(snapshot.bookmarks.len(), 2);

        let reopened = open(dir.path());
        assert_eq!(reopened.snapshot(), snapshot);
    }

    #[test]
    fn switching_drm_kind_deletes_previous_artifacts() {
        let dir = tempdir().unwrap();
        let handle = open(dir.path());

        handle.set_drm_kind(DrmKind::Acs).unwrap();
        let drm = handle.drm();
        let acs = drm.as_acs().unwrap();
        acs.set_acsm_file(Some(b"<token/>")).unwrap();
        acs.set_adobe_rights_information(Some(AdobeRightsUpdate {
            rights: b"<rights/>".to_vec(),
            loan: AdobeLoan {
                loan_id: "l".into(),
                returnable: false,
                expires: None,
            },
        }))
        .unwrap();
        assert!(dir.path().join("epub-rights_adobe.xml").exists());
        assert!(matches!(handle.snapshot().drm_info, DrmInformation::Acs(ref info) if info.rights.is_some()));

        handle.set_drm_kind(DrmKind::Axis).unwrap();
        assert!(!dir.path().join("epub-rights_adobe.xml").exists());
        assert!(!dir.path().join("epub-meta_adobe.acsm").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("epub-drm.txt")).unwrap(),
            "AXIS"
        );
        assert_eq!(open(dir.path()).drm().kind(), DrmKind::Axis);
    }

    #[test]
    fn drm_changes_propagate_to_owner() {
        let dir = tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = EpubHandle::open(
            Arc::new(LocalFileStore::new()),
            dir.path(),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        handle.set_drm_kind(DrmKind::Axis).unwrap();
        handle.drm().as_axis().unwrap().set_token(Some(b"{}")).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match &handle.snapshot().drm_info {
            DrmInformation::Axis(info) => assert!(info.token.is_some()),
            other => panic!("expected AXIS, got {other:?}"),
        }
    }

    #[test]
    fn failed_marker_write_never_leaves_book_under_old_drm() {
        let store = Arc::new(MemoryFileStore::new());
        let dir = Path::new("/book");
        let download = Path::new("/book/download");
        store.create_dir_all(dir).unwrap();
        store.write_atomic(download, b"protected").unwrap();
        let handle = EpubHandle::open(store.clone(), dir, no_update()).unwrap();
        handle.copy_in_book_with_drm(download, DrmKind::Lcp).unwrap();
        assert_eq!(handle.snapshot().drm_info, DrmInformation::Lcp);

        store.write_atomic(download, b"plain").unwrap();
        store.fail_writes_to("/book/epub-drm.txt");
        assert!(handle.copy_in_book_with_drm(download, DrmKind::None).is_err());

        let snapshot = handle.snapshot();
        assert!(snapshot.file.is_none());
        assert_eq!(snapshot.drm_info, DrmInformation::Lcp);
        assert!(!store.exists(Path::new("/book/epub-book.epub")));
        let reopened = EpubHandle::open(store.clone(), dir, no_update()).unwrap();
        assert_eq!(reopened.snapshot(), snapshot);

        store.clear_failures();
        handle.copy_in_book_with_drm(download, DrmKind::None).unwrap();
        assert_eq!(handle.drm().kind(), DrmKind::None);
        assert_eq!(
            store.read(Path::new("/book/epub-book.epub")).unwrap().unwrap(),
            b"plain"
        );
    }

    #[test]
    fn combined_copy_publishes_once() {
        let dir = tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = EpubHandle::open(
            Arc::new(LocalFileStore::new()),
            dir.path(),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        let source = dir.path().join("download");
        std::fs::write(&source, b"book").unwrap();

        handle.copy_in_book_with_drm(&source, DrmKind::Axis).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let snapshot = handle.snapshot();
        assert!(snapshot.file.is_some());
        assert!(matches!(snapshot.drm_info, DrmInformation::Axis(_)));
    }
}

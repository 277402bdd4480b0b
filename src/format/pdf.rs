//! PDF format handle

use super::serialization::LAST_READ_PAGE;
use super::{BookFiles, forward_to, load_document, save_document};
use crate::drm::{DrmHandle, DrmInformation, DrmKind, OnUpdate};
use crate::error::Result;
use crate::storage::FileStore;
use crate::utils::lock;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

/// Snapshot of a PDF format
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PdfFormat {
    /// The book file, once downloaded
    pub file: Option<PathBuf>,
    /// DRM protecting the book file
    pub drm_info: DrmInformation,
    /// Page the reader left off on
    pub last_read_page: Option<u32>,
}

struct PdfState {
    drm: DrmHandle,
    snapshot: Arc<PdfFormat>,
}

/// Handle over the PDF files of one book
pub struct PdfHandle {
    files: BookFiles,
    last_read_path: PathBuf,
    state: Mutex<PdfState>,
    on_update: OnUpdate,
    me: Weak<PdfHandle>,
}

impl fmt::Debug for PdfHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfHandle")
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

impl PdfHandle {
    pub(crate) fn open(
        store: Arc<dyn FileStore>,
        directory: &Path,
        on_update: OnUpdate,
    ) -> Result<Arc<Self>> {
        let files = BookFiles::new(store, directory, "pdf", "pdf-book.pdf");
        let last_read_path = directory.join("pdf-meta_last_read.json");
        let last_read_page = load_document(files.store(), &last_read_path, &LAST_READ_PAGE)?;
        let file = files.existing_book();

        let mut drm_failure = None;
        let handle = Arc::new_cyclic(|me: &Weak<Self>| {
            let drm = files
                .open_drm(forward_to(me.clone(), Self::drm_changed))
                .unwrap_or_else(|e| {
                    drm_failure = Some(e);
                    DrmHandle::None
                });
            let snapshot = Arc::new(PdfFormat {
                file,
                drm_info: drm.snapshot(),
                last_read_page,
            });
            Self {
                files,
                last_read_path,
                state: Mutex::new(PdfState { drm, snapshot }),
                on_update,
                me: me.clone(),
            }
        });
        drm_failure.map_or(Ok(handle), Err)
    }

    /// Current state
    pub fn snapshot(&self) -> Arc<PdfFormat> {
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

    /// Record the page the reader left off on, or clear it
    pub fn set_last_read_page(&self, page: Option<u32>) -> Result<()> {
        self.update(|files, _, next| {
            save_document(
                files.store(),
                &self.last_read_path,
                &LAST_READ_PAGE,
                page.as_ref(),
            )?;
            next.last_read_page = page;
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

    /// Delete the book file and DRM artifacts; the reading position stays
    pub fn delete_book_data(&self) -> Result<()> {
        self.update(|files, drm, next| {
            files.delete_book_data()?;
            *drm = DrmHandle::None;
            next.file = None;
            next.drm_info = DrmInformation::None;
            Ok(())
        })
    }

    fn update(
        &self,
        mutate: impl FnOnce(&BookFiles, &mut DrmHandle, &mut PdfFormat) -> Result<()>,
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

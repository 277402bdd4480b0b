//! Per-format persisted state
//!
//! A book entry owns one [`FormatHandle`] per content format it can hold.
//! Each handle keeps an immutable snapshot behind its own lock, replaced
//! wholesale after the backing file lands. Handles notify their owner through
//! a callback invoked only after the lock is released.
//!
//! Files follow the `<format>-<artifact>` convention inside the book
//! directory, e.g. `epub-book.epub` or `audiobook-position.json`.

mod audiobook;
mod epub;
mod pdf;
pub mod serialization;

pub use self::audiobook::{AudioBookFormat, AudioBookHandle, AudioBookManifest};
pub use self::epub::{EpubFormat, EpubHandle};
pub use self::pdf::{PdfFormat, PdfHandle};
pub use self::serialization::{Bookmark, CURRENT_VERSION, PlayerPosition};

use crate::config::FormatSupport;
use crate::drm::{self, DrmFiles, DrmHandle, DrmKind, OnUpdate};
use crate::error::{Error, FormatError, Result};
use crate::mime::MimeType;
use crate::storage::FileStore;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// The formats a book entry can hold, in matching order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormatDefinition {
    /// EPUB books
    Epub,
    /// PDF books
    Pdf,
    /// Audio books described by a manifest
    AudioBook,
}

impl FormatDefinition {
    /// Every definition, in the order they are matched against content types
    pub const ALL: [FormatDefinition; 3] = [
        FormatDefinition::Epub,
        FormatDefinition::Pdf,
        FormatDefinition::AudioBook,
    ];

    /// File name prefix of this format's artifacts
    pub fn prefix(&self) -> &'static str {
        match self {
            FormatDefinition::Epub => "epub",
            FormatDefinition::Pdf => "pdf",
            FormatDefinition::AudioBook => "audiobook",
        }
    }

    /// True if content of `mime_type` is stored by this format
    pub fn can_hold(&self, mime_type: &MimeType) -> bool {
        match self {
            FormatDefinition::Epub => mime_type.is(crate::mime::EPUB),
            FormatDefinition::Pdf => mime_type.is(crate::mime::PDF),
            FormatDefinition::AudioBook => mime_type.is_audiobook_manifest(),
        }
    }

    /// True if the format-support policy accepts this format
    pub fn is_supported_by(&self, support: &FormatSupport) -> bool {
        match self {
            FormatDefinition::Epub => true,
            FormatDefinition::Pdf => support.pdf,
            FormatDefinition::AudioBook => support.audiobooks,
        }
    }

    /// The first supported definition able to hold `mime_type`
    pub fn for_content_type(mime_type: &MimeType, support: &FormatSupport) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|d| d.can_hold(mime_type) && d.is_supported_by(support))
    }

    /// Open this format's handle over `directory`, loading whatever exists
    pub fn open(
        self,
        store: Arc<dyn FileStore>,
        directory: &Path,
        on_update: OnUpdate,
    ) -> Result<FormatHandle> {
        Ok(match self {
            FormatDefinition::Epub => {
                FormatHandle::Epub(EpubHandle::open(store, directory, on_update)?)
            }
            FormatDefinition::Pdf => FormatHandle::Pdf(PdfHandle::open(store, directory, on_update)?),
            FormatDefinition::AudioBook => {
                FormatHandle::AudioBook(AudioBookHandle::open(store, directory, on_update)?)
            }
        })
    }
}

impl fmt::Display for FormatDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Snapshot of one format's state
#[derive(Clone, Debug, PartialEq)]
pub enum BookFormat {
    /// EPUB state
    Epub(Arc<EpubFormat>),
    /// PDF state
    Pdf(Arc<PdfFormat>),
    /// Audio book state
    AudioBook(Arc<AudioBookFormat>),
}

impl BookFormat {
    /// The definition this snapshot belongs to
    pub fn definition(&self) -> FormatDefinition {
        match self {
            BookFormat::Epub(_) => FormatDefinition::Epub,
            BookFormat::Pdf(_) => FormatDefinition::Pdf,
            BookFormat::AudioBook(_) => FormatDefinition::AudioBook,
        }
    }

    /// True once the book content is on disk
    pub fn is_downloaded(&self) -> bool {
        match self {
            BookFormat::Epub(epub) => epub.file.is_some(),
            BookFormat::Pdf(pdf) => pdf.file.is_some(),
            BookFormat::AudioBook(audio) => audio.manifest.is_some(),
        }
    }
}

/// Handle over one format of one book
#[derive(Clone, Debug)]
pub enum FormatHandle {
    /// EPUB
    Epub(Arc<EpubHandle>),
    /// PDF
    Pdf(Arc<PdfHandle>),
    /// Audio book
    AudioBook(Arc<AudioBookHandle>),
}

impl FormatHandle {
    /// The definition of this handle
    pub fn definition(&self) -> FormatDefinition {
        match self {
            FormatHandle::Epub(_) => FormatDefinition::Epub,
            FormatHandle::Pdf(_) => FormatDefinition::Pdf,
            FormatHandle::AudioBook(_) => FormatDefinition::AudioBook,
        }
    }

    /// Current state
    pub fn snapshot(&self) -> BookFormat {
        match self {
            FormatHandle::Epub(h) => BookFormat::Epub(h.snapshot()),
            FormatHandle::Pdf(h) => BookFormat::Pdf(h.snapshot()),
            FormatHandle::AudioBook(h) => BookFormat::AudioBook(h.snapshot()),
        }
    }

    /// Replace the book file with a copy of `source`
    pub fn copy_in_book(&self, source: &Path) -> Result<()> {
        match self {
            FormatHandle::Epub(h) => h.copy_in_book(source),
            FormatHandle::Pdf(h) => h.copy_in_book(source),
            FormatHandle::AudioBook(_) => Err(Error::NotSupported(
                "audio books are stored as manifests, not book files".into(),
            )),
        }
    }

    /// Replace the book file with a copy of `source` protected by `kind`
    pub fn copy_in_book_with_drm(&self, source: &Path, kind: DrmKind) -> Result<()> {
        match self {
            FormatHandle::Epub(h) => h.copy_in_book_with_drm(source, kind),
            FormatHandle::Pdf(h) => h.copy_in_book_with_drm(source, kind),
            FormatHandle::AudioBook(_) => Err(Error::NotSupported(
                "audio books are stored as manifests, not book files".into(),
            )),
        }
    }

    /// Switch the active DRM kind
    pub fn set_drm_kind(&self, kind: DrmKind) -> Result<()> {
        match self {
            FormatHandle::Epub(h) => h.set_drm_kind(kind),
            FormatHandle::Pdf(h) => h.set_drm_kind(kind),
            FormatHandle::AudioBook(_) if kind == DrmKind::None => Ok(()),
            FormatHandle::AudioBook(_) => Err(Error::Format(FormatError::WrongDrmKind {
                expected: DrmKind::None.to_string(),
                actual: kind.to_string(),
            })),
        }
    }

    /// The active DRM handle; audio books have none
    pub fn drm(&self) -> Option<DrmHandle> {
        match self {
            FormatHandle::Epub(h) => Some(h.drm()),
            FormatHandle::Pdf(h) => Some(h.drm()),
            FormatHandle::AudioBook(_) => None,
        }
    }

    /// Delete downloaded content and DRM artifacts, keeping reading state
    pub fn delete_book_data(&self) -> Result<()> {
        match self {
            FormatHandle::Epub(h) => h.delete_book_data(),
            FormatHandle::Pdf(h) => h.delete_book_data(),
            FormatHandle::AudioBook(h) => h.delete_book_data(),
        }
    }

    /// The EPUB handle, if this is one
    pub fn as_epub(&self) -> Option<&Arc<EpubHandle>> {
        match self {
            FormatHandle::Epub(h) => Some(h),
            _ => None,
        }
    }

    /// The PDF handle, if this is one
    pub fn as_pdf(&self) -> Option<&Arc<PdfHandle>> {
        match self {
            FormatHandle::Pdf(h) => Some(h),
            _ => None,
        }
    }

    /// The audio book handle, if this is one
    pub fn as_audiobook(&self) -> Option<&Arc<AudioBookHandle>> {
        match self {
            FormatHandle::AudioBook(h) => Some(h),
            _ => None,
        }
    }
}

/// Book file and DRM artifacts shared by EPUB and PDF
#[derive(Debug)]
pub(crate) struct BookFiles {
    store: Arc<dyn FileStore>,
    book: PathBuf,
    drm: DrmFiles,
}

impl BookFiles {
    pub(crate) fn new(
        store: Arc<dyn FileStore>,
        directory: &Path,
        prefix: &'static str,
        book_name: &str,
    ) -> Self {
        Self {
            book: directory.join(book_name),
            drm: DrmFiles::new(directory, prefix),
            store,
        }
    }

    pub(crate) fn store(&self) -> &dyn FileStore {
        self.store.as_ref()
    }

    /// The book file, if present
    pub(crate) fn existing_book(&self) -> Option<PathBuf> {
        drm::present(self.store.as_ref(), &self.book)
    }

    pub(crate) fn open_drm(&self, on_update: OnUpdate) -> Result<DrmHandle> {
        DrmHandle::open(self.store.clone(), self.drm.clone(), on_update)
    }

    pub(crate) fn copy_in(&self, source: &Path) -> Result<PathBuf> {
        self.store.copy_in(source, &self.book)?;
        Ok(self.book.clone())
    }

    /// Delete the previous kind's artifacts, record the new kind, open its handle
    pub(crate) fn switch_drm(
        &self,
        current: &DrmHandle,
        kind: DrmKind,
        on_update: OnUpdate,
    ) -> Result<DrmHandle> {
        drm::delete_files(self.store.as_ref(), &self.drm.artifacts(current.kind()))?;
        drm::write_marker(self.store.as_ref(), &self.drm, kind)?;
        DrmHandle::open_kind(kind, self.store.clone(), self.drm.clone(), on_update)
    }

    /// Install `source` as the book, protected by `kind`
    ///
    /// When the kind changes, the old book is deleted and the new marker is
    /// written before the copy, so no step leaves a book under a marker that
    /// does not describe it. `drm` is replaced once the switch succeeds.
    pub(crate) fn install_book(
        &self,
        drm: &mut DrmHandle,
        kind: DrmKind,
        source: &Path,
        on_update: OnUpdate,
    ) -> Result<PathBuf> {
        if drm.kind() != kind {
            self.store.delete(&self.book)?;
            *drm = self.switch_drm(drm, kind, on_update)?;
        }
        self.copy_in(source)
    }

    /// Delete the book file and every DRM artifact, leaving a `NONE` marker
    pub(crate) fn delete_book_data(&self) -> Result<()> {
        self.store.delete(&self.book)?;
        drm::delete_files(self.store.as_ref(), &self.drm.all_artifacts())?;
        drm::write_marker(self.store.as_ref(), &self.drm, DrmKind::None)
    }
}

/// Callback that forwards DRM changes to the owning format handle
pub(crate) fn forward_to<H, F>(owner: Weak<H>, on_change: F) -> OnUpdate
where
    H: Send + Sync + 'static,
    F: Fn(&H) + Send + Sync + 'static,
{
    Arc::new(move || {
        if let Some(handle) = owner.upgrade() {
            on_change(&handle);
        }
    })
}

/// Read and decode an optional versioned document
pub(crate) fn load_document<T>(
    store: &dyn FileStore,
    path: &Path,
    schema: &serialization::SchemaRegistry<T>,
) -> Result<Option<T>> {
    match store.read(path)? {
        Some(bytes) => schema.decode(&bytes).map(Some),
        None => Ok(None),
    }
}

/// Encode and write a versioned document, or delete it with `None`
pub(crate) fn save_document<T>(
    store: &dyn FileStore,
    path: &Path,
    schema: &serialization::SchemaRegistry<T>,
    value: Option<&T>,
) -> Result<()> {
    match value {
        Some(value) => store.write_atomic(path, &schema.encode(value)?)?,
        None => store.delete(path)?,
    }
    Ok(())
}

//! Book database: one directory per book, keyed by [`BookId`]
//!
//! The entry map is a [`DashMap`], so lookups and snapshots never block on
//! each other. Structural changes (creating, deleting) go through the
//! database's own methods and are serialized by a writer lock.
//!
//! ```text
//! <root>/<account>/
//!   <book id>/meta.json
//!   <book id>/epub-book.epub
//!   <book id>/epub-drm.txt
//!   ...
//! ```

mod entry;

pub use self::entry::{Book, BookDatabaseEntry, METADATA_FILE};

use crate::acquisition::FeedEntry;
use crate::config::FormatSupport;
use crate::error::{DatabaseError, EntryFailure, Result};
use crate::registry::BookRegistry;
use crate::storage::FileStore;
use crate::types::{AccountId, BookId};
use crate::utils::lock;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

pub(crate) struct DatabaseInner {
    pub(crate) directory: PathBuf,
    pub(crate) account: AccountId,
    pub(crate) store: Arc<dyn FileStore>,
    pub(crate) support: FormatSupport,
    entries: DashMap<BookId, Arc<BookDatabaseEntry>>,
    registry: OnceLock<BookRegistry>,
    writer: Mutex<()>,
}

impl DatabaseInner {
    /// Remove a deleted entry's directory and forget it
    pub(crate) fn remove_entry(&self, id: &BookId, directory: &Path) -> Result<()> {
        let _writer = lock(&self.writer);
        self.store.remove_dir_all(directory)?;
        self.entries.remove(id);
        self.forget_status(id);
        Ok(())
    }

    fn forget_status(&self, id: &BookId) {
        if let Some(registry) = self.registry.get() {
            registry.remove(id);
        }
    }
}

/// The books of one account
///
/// Cloning is cheap; clones share the same entries.
///
/// # Examples
///
/// ```no_run
/// use book_borrow::config::FormatSupport;
/// use book_borrow::database::BookDatabase;
/// use book_borrow::storage::LocalFileStore;
/// use book_borrow::types::AccountId;
/// use std::sync::Arc;
///
/// # fn main() -> book_borrow::Result<()> {
/// let db = BookDatabase::open(
///     Arc::new(LocalFileStore::new()),
///     "./books/account-1",
///     AccountId::generate(),
///     FormatSupport::default(),
/// )?;
/// for (id, book) in db.books() {
///     println!("{id}: {}", book.entry.title);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BookDatabase {
    inner: Arc<DatabaseInner>,
}

impl fmt::Debug for BookDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookDatabase")
            .field("directory", &self.inner.directory)
            .field("account", &self.inner.account)
            .field("entries", &self.inner.entries.len())
            .finish()
    }
}

impl BookDatabase {
    /// Open the database in `directory`, creating the directory if needed
    ///
    /// Every book-id-named subdirectory is loaded. Failures are collected
    /// across all of them; if there are any, nothing is opened and the error
    /// names each one. Subdirectories with other names are ignored.
    pub fn open(
        store: Arc<dyn FileStore>,
        directory: impl Into<PathBuf>,
        account: AccountId,
        support: FormatSupport,
    ) -> Result<Self> {
        let directory = directory.into();
        store.create_dir_all(&directory)?;

        let inner = Arc::new(DatabaseInner {
            directory: directory.clone(),
            account,
            store: store.clone(),
            support,
            entries: DashMap::new(),
            registry: OnceLock::new(),
            writer: Mutex::new(()),
        });

        let mut failures = Vec::new();
        let mut loaded = Vec::new();
        for path in store.list_dirs(&directory)? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(id) = BookId::parse(name) else {
                tracing::debug!(path = %path.display(), "ignoring non-book directory");
                continue;
            };

            let meta_path = path.join(METADATA_FILE);
            let feed_entry = match read_metadata(store.as_ref(), &meta_path) {
                Ok(Some(feed_entry)) => feed_entry,
                Ok(None) => {
                    tracing::warn!(
                        book_id = %id,
                        "book directory has no metadata, skipping incomplete entry"
                    );
                    continue;
                }
                Err(e) => {
                    failures.push(EntryFailure::new(&meta_path, e));
                    continue;
                }
            };

            match BookDatabaseEntry::open(&inner, id, feed_entry) {
                Ok(entry) => loaded.push(entry),
                Err(e) => failures.push(EntryFailure::new(&path, e)),
            }
        }

        if !failures.is_empty() {
            tracing::error!(
                directory = %directory.display(),
                failures = failures.len(),
                "book database failed to open"
            );
            return Err(DatabaseError::OpenFailed {
                directory,
                failures,
            }
            .into());
        }

        for entry in loaded {
            inner.entries.insert(entry.id().clone(), entry);
        }
        tracing::info!(
            directory = %directory.display(),
            books = inner.entries.len(),
            "book database opened"
        );
        Ok(Self { inner })
    }

    /// Database directory
    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    /// Owning account
    pub fn account(&self) -> AccountId {
        self.inner.account
    }

    /// Forget a book's status in `registry` when its entry is deleted
    ///
    /// Only the first registry attached is kept.
    pub fn attach_registry(&self, registry: BookRegistry) {
        if self.inner.registry.set(registry).is_err() {
            tracing::warn!(
                directory = %self.inner.directory.display(),
                "book database already has a status registry"
            );
        }
    }

    /// Format-support policy applied to new entries
    pub fn format_support(&self) -> &FormatSupport {
        &self.inner.support
    }

    /// Write `feed_entry` as the metadata of `id`, creating the entry if needed
    pub fn create_or_update(&self, id: &BookId, feed_entry: FeedEntry) -> Result<Arc<BookDatabaseEntry>> {
        let _writer = lock(&self.inner.writer);

        if let Some(existing) = self.inner.entries.get(id).map(|e| e.value().clone()) {
            existing.write_feed_entry(feed_entry)?;
            return Ok(existing);
        }

        let directory = self.inner.directory.join(id.as_str());
        let bytes = serde_json::to_vec_pretty(&feed_entry)?;
        self.inner.store.create_dir_all(&directory)?;
        self.inner
            .store
            .write_atomic(&directory.join(METADATA_FILE), &bytes)?;

        let entry = BookDatabaseEntry::open(&self.inner, id.clone(), feed_entry)?;
        self.inner.entries.insert(id.clone(), entry.clone());
        tracing::info!(book_id = %id, "book entry created");
        Ok(entry)
    }

    /// The entry for `id`
    pub fn entry(&self, id: &BookId) -> Result<Arc<BookDatabaseEntry>> {
        self.inner
            .entries
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| DatabaseError::NonexistentEntry { id: id.clone() }.into())
    }

    /// True if the database holds `id`
    pub fn contains(&self, id: &BookId) -> bool {
        self.inner.entries.contains_key(id)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// True if there are no entries
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// A point-in-time copy of every entry, sorted by id
    pub fn entries(&self) -> BTreeMap<BookId, Arc<BookDatabaseEntry>> {
        self.inner
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// A point-in-time copy of every book snapshot, sorted by id
    pub fn books(&self) -> BTreeMap<BookId, Arc<Book>> {
        self.inner
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().book()))
            .collect()
    }

    /// Delete one book; see [`BookDatabaseEntry::delete`]
    pub fn delete_entry(&self, id: &BookId) -> Result<()> {
        self.entry(id)?.delete()
    }

    /// Delete the whole database directory and forget every entry
    pub fn delete(&self) -> Result<()> {
        let _writer = lock(&self.inner.writer);
        self.inner.store.remove_dir_all(&self.inner.directory)?;
        for entry in self.inner.entries.iter() {
            self.inner.forget_status(entry.key());
        }
        self.inner.entries.clear();
        tracing::info!(directory = %self.inner.directory.display(), "book database deleted");
        Ok(())
    }
}

fn read_metadata(store: &dyn FileStore, path: &Path) -> std::result::Result<Option<FeedEntry>, DatabaseError> {
    let unreadable = |reason: String| DatabaseError::MetadataUnreadable {
        path: path.to_path_buf(),
        reason,
    };
    match store.read(path) {
        Ok(Some(bytes)) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| unreadable(e.to_string())),
        Ok(None) => Ok(None),
        Err(e) => Err(unreadable(e.to_string())),
    }
}

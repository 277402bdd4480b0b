//! One book's directory: metadata plus format handles

use super::DatabaseInner;
use crate::acquisition::FeedEntry;
use crate::config::FormatSupport;
use crate::drm::OnUpdate;
use crate::error::{DatabaseError, EntryFailure, Result};
use crate::format::{BookFormat, FormatDefinition, FormatHandle};
use crate::mime::MimeType;
use crate::storage::FileStore;
use crate::types::{AccountId, BookId};
use crate::utils::lock;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

/// Name of the metadata file inside each book directory
pub const METADATA_FILE: &str = "meta.json";

/// Aggregate snapshot of one book
#[derive(Clone, Debug, PartialEq)]
pub struct Book {
    /// Book identifier
    pub id: BookId,
    /// Owning account
    pub account: AccountId,
    /// Catalog entry
    pub entry: FeedEntry,
    /// Current state of every format, in definition order
    pub formats: Vec<BookFormat>,
}

impl Book {
    /// The snapshot of one format, if the book has it
    pub fn format(&self, definition: FormatDefinition) -> Option<&BookFormat> {
        self.formats.iter().find(|f| f.definition() == definition)
    }

    /// True if any format has its content on disk
    pub fn is_downloaded(&self) -> bool {
        self.formats.iter().any(BookFormat::is_downloaded)
    }
}

struct EntryState {
    feed_entry: FeedEntry,
    handles: BTreeMap<FormatDefinition, FormatHandle>,
    book: Arc<Book>,
}

/// A book in the database
///
/// Owns the format handles of one book directory and republishes their
/// combined state as a [`Book`] snapshot whenever any of them changes.
pub struct BookDatabaseEntry {
    id: BookId,
    account: AccountId,
    directory: PathBuf,
    store: Arc<dyn FileStore>,
    support: FormatSupport,
    database: Weak<DatabaseInner>,
    state: Mutex<EntryState>,
    me: Weak<BookDatabaseEntry>,
}

impl fmt::Debug for BookDatabaseEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookDatabaseEntry")
            .field("id", &self.id)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl BookDatabaseEntry {
    /// Build an entry over an existing directory whose metadata is already on disk
    pub(crate) fn open(
        database: &Arc<DatabaseInner>,
        id: BookId,
        feed_entry: FeedEntry,
    ) -> Result<Arc<Self>> {
        let directory = database.directory.join(id.as_str());
        let entry = Arc::new_cyclic(|me: &Weak<Self>| Self {
            account: database.account,
            store: database.store.clone(),
            support: database.support.clone(),
            database: Arc::downgrade(database),
            state: Mutex::new(EntryState {
                book: Arc::new(Book {
                    id: id.clone(),
                    account: database.account,
                    entry: feed_entry.clone(),
                    formats: Vec::new(),
                }),
                feed_entry,
                handles: BTreeMap::new(),
            }),
            me: me.clone(),
            id,
            directory,
        });

        {
            let mut state = lock(&entry.state);
            let feed_entry = state.feed_entry.clone();
            entry.add_missing_handles(&mut state, &feed_entry)?;
            state.book = Arc::new(entry.compose(&state));
        }
        Ok(entry)
    }

    /// Book identifier
    pub fn id(&self) -> &BookId {
        &self.id
    }

    /// The book's directory
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Current aggregate snapshot
    pub fn book(&self) -> Arc<Book> {
        lock(&self.state).book.clone()
    }

    /// Current catalog entry
    pub fn feed_entry(&self) -> FeedEntry {
        lock(&self.state).feed_entry.clone()
    }

    /// Every format handle, in definition order
    pub fn format_handles(&self) -> Vec<FormatHandle> {
        lock(&self.state).handles.values().cloned().collect()
    }

    /// The handle of one format
    pub fn format_handle(&self, definition: FormatDefinition) -> Option<FormatHandle> {
        lock(&self.state).handles.get(&definition).cloned()
    }

    /// The handle able to store content of `mime_type`
    pub fn find_format_handle_for_content_type(&self, mime_type: &MimeType) -> Option<FormatHandle> {
        let state = lock(&self.state);
        FormatDefinition::ALL
            .into_iter()
            .filter(|d| d.can_hold(mime_type))
            .find_map(|d| state.handles.get(&d).cloned())
    }

    /// Replace the catalog entry, creating handles for newly advertised formats
    ///
    /// Existing handles are left untouched.
    pub fn write_feed_entry(&self, feed_entry: FeedEntry) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&feed_entry)?;
        {
            let mut state = lock(&self.state);
            self.store
                .write_atomic(&self.directory.join(METADATA_FILE), &bytes)?;
            self.add_missing_handles(&mut state, &feed_entry)?;
            state.feed_entry = feed_entry;
            state.book = Arc::new(self.compose(&state));
        }
        tracing::debug!(book_id = %self.id, "feed entry updated");
        Ok(())
    }

    /// Delete the book's data and directory, and remove it from the database
    ///
    /// Every format deletes its data first. If any fails, the failures are
    /// returned together and the directory is kept.
    pub fn delete(&self) -> Result<()> {
        let mut failures = Vec::new();
        for handle in self.format_handles() {
            if let Err(e) = handle.delete_book_data() {
                tracing::warn!(
                    book_id = %self.id,
                    format = %handle.definition(),
                    error = %e,
                    "failed to delete format data"
                );
                failures.push(EntryFailure::new(
                    self.directory.join(handle.definition().prefix()),
                    e,
                ));
            }
        }
        if !failures.is_empty() {
            return Err(DatabaseError::DeleteFailed {
                id: self.id.clone(),
                failures,
            }
            .into());
        }

        match self.database.upgrade() {
            Some(database) => database.remove_entry(&self.id, &self.directory)?,
            None => self.store.remove_dir_all(&self.directory)?,
        }
        tracing::info!(book_id = %self.id, "book deleted");
        Ok(())
    }

    fn add_missing_handles(&self, state: &mut EntryState, feed_entry: &FeedEntry) -> Result<()> {
        for content_type in feed_entry.acquisition_content_types() {
            let Some(definition) = FormatDefinition::for_content_type(&content_type, &self.support)
            else {
                tracing::debug!(
                    book_id = %self.id,
                    content_type = %content_type,
                    "no supported format for content type, skipping"
                );
                continue;
            };
            if state.handles.contains_key(&definition) {
                continue;
            }
            let handle = definition.open(self.store.clone(), &self.directory, self.on_format_update())?;
            state.handles.insert(definition, handle);
        }
        Ok(())
    }

    fn on_format_update(&self) -> OnUpdate {
        let me = self.me.clone();
        Arc::new(move || {
            if let Some(entry) = me.upgrade() {
                entry.refresh();
            }
        })
    }

    fn refresh(&self) {
        let mut state = lock(&self.state);
        state.book = Arc::new(self.compose(&state));
    }

    fn compose(&self, state: &EntryState) -> Book {
        Book {
            id: self.id.clone(),
            account: self.account,
            entry: state.feed_entry.clone(),
            formats: state.handles.values().map(FormatHandle::snapshot).collect(),
        }
    }
}

//! # book-borrow
//!
//! Acquisition pipeline and crash-safe local storage for library e-books
//! and audio books.
//!
//! ## Overview
//!
//! book-borrow is designed around two halves:
//! - **Borrowing** - a [`Borrower`](borrow::Borrower) walks an acquisition
//!   path (loan request, bearer token, DRM fulfillment, download), picking one
//!   subtask per step from an explicit [`SubtaskDirectory`](borrow::SubtaskDirectory)
//! - **Storage** - a [`BookDatabase`] keeps one directory per book, with
//!   per-format and per-DRM handles that write atomically and publish
//!   immutable snapshots
//! - **Event-driven** - status changes are broadcast by the [`BookRegistry`],
//!   so consumers subscribe instead of polling
//!
//! ## Quick Start
//!
//! ```no_run
//! use book_borrow::borrow::{Borrower, BorrowServices, ReqwestHttpClient};
//! use book_borrow::storage::LocalFileStore;
//! use book_borrow::{
//!     AccountId, AccountState, AcquisitionPath, BookDatabase, BookRegistry, Config, FeedEntry,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::default());
//!     let account = AccountState::anonymous(AccountId::generate());
//!     let database = BookDatabase::open(
//!         Arc::new(LocalFileStore::new()),
//!         config.storage.root.join(account.id.to_string()),
//!         account.id,
//!         config.formats.clone(),
//!     )?;
//!
//!     let registry = BookRegistry::new();
//!     let mut events = registry.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("{}: {:?}", event.id, event.status);
//!         }
//!     });
//!
//!     let http = Arc::new(ReqwestHttpClient::new(&config.http)?);
//!     let borrower = Borrower::new(BorrowServices::new(config.clone(), http, registry));
//!
//!     let feed_entry: FeedEntry = serde_json::from_str(&std::fs::read_to_string("entry.json")?)?;
//!     let path = AcquisitionPath::preferred(&feed_entry, &config.formats).ok_or("no usable acquisition")?;
//!     let entry = database.create_or_update(&feed_entry.book_id(), feed_entry)?;
//!
//!     let result = borrower.borrow(entry, account, path, CancellationToken::new()).await;
//!     println!("{:?}", result.outcome);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Catalog entries and acquisition paths
pub mod acquisition;
/// Borrow pipeline: walker, subtasks, collaborators
pub mod borrow;
/// Configuration types
pub mod config;
/// Per-account book database
pub mod database;
/// DRM state handles
pub mod drm;
/// Error types
pub mod error;
/// Format handles and versioned reading-state documents
pub mod format;
/// MIME types
pub mod mime;
/// Throttled progress reporting
pub mod progress;
/// Task step recording
pub mod recorder;
/// Book status registry
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// File capability used by the storage engine
pub mod storage;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use acquisition::{Acquisition, AcquisitionPath, AcquisitionPathElement, Availability, FeedEntry};
pub use config::{Config, FormatSupport};
pub use database::{Book, BookDatabase, BookDatabaseEntry};
pub use drm::{DrmHandle, DrmInformation, DrmKind};
pub use error::{BorrowErrorCode, DatabaseError, Error, FormatError, Result, SubtaskError};
pub use format::{BookFormat, FormatDefinition, FormatHandle};
pub use mime::MimeType;
pub use recorder::{TaskRecorder, TaskStep};
pub use registry::BookRegistry;
pub use types::{AccountId, AccountState, BookId, BookStatus, BookStatusEvent};

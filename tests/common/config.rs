//! Test harness: temporary storage, fast retries, one account database

use book_borrow::borrow::{BorrowServices, Borrower, ReqwestHttpClient};
use book_borrow::config::{Config, FormatSupport, RetryConfig};
use book_borrow::storage::LocalFileStore;
use book_borrow::{AccountId, BookDatabase, BookDatabaseEntry, BookRegistry, FeedEntry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Everything one scenario needs, rooted in a temporary directory
pub struct Harness {
    /// Keeps the directory alive for the test's duration
    pub dir: TempDir,
    /// Shared configuration
    pub config: Arc<Config>,
    /// Status registry the borrower publishes to
    pub registry: BookRegistry,
    /// The account's book database
    pub database: BookDatabase,
    /// The account
    pub account: AccountId,
}

impl Harness {
    /// Harness with the default format-support policy
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Harness with Adobe and AxisNow enabled in the format policy
    pub fn with_drm() -> Self {
        Self::with_config(|config| {
            config.formats = FormatSupport {
                adobe_drm: true,
                axis_drm: true,
                ..FormatSupport::default()
            };
        })
    }

    /// Harness with a customized configuration
    pub fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.root = dir.path().join("books");
        config.storage.temp_dir = dir.path().join("tmp");
        config.retry = RetryConfig {
            max_attempts: 1,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        config.http.request_timeout = Duration::from_secs(10);
        customize(&mut config);

        let account = AccountId::generate();
        let database = BookDatabase::open(
            Arc::new(LocalFileStore::new()),
            config.storage.root.join(account.to_string()),
            account,
            config.formats.clone(),
        )
        .unwrap();
        let registry = BookRegistry::new();
        database.attach_registry(registry.clone());

        Self {
            dir,
            config: Arc::new(config),
            registry,
            database,
            account,
        }
    }

    /// Services backed by a real reqwest client
    pub fn services(&self) -> BorrowServices {
        let http = Arc::new(ReqwestHttpClient::new(&self.config.http).unwrap());
        BorrowServices::new(self.config.clone(), http, self.registry.clone())
    }

    /// Borrower over [`services`](Self::services)
    pub fn borrower(&self) -> Borrower {
        Borrower::new(self.services())
    }

    /// Admit a catalog entry into the database
    pub fn admit(&self, entry: FeedEntry) -> Arc<BookDatabaseEntry> {
        self.database
            .create_or_update(&entry.book_id(), entry)
            .unwrap()
    }

    /// Root of the account database
    pub fn database_dir(&self) -> PathBuf {
        self.database.directory().to_path_buf()
    }

    /// Directory holding in-flight downloads
    pub fn temp_dir(&self) -> PathBuf {
        self.config.storage.temp_dir.clone()
    }

    /// Reopen the database from disk
    pub fn reopen(&self) -> BookDatabase {
        BookDatabase::open(
            Arc::new(LocalFileStore::new()),
            self.database_dir(),
            self.account,
            self.config.formats.clone(),
        )
        .unwrap()
    }
}

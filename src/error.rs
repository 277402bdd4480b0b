//! Error types for book-borrow
//!
//! This module provides error handling for the library, including:
//! - The crate-level [`Error`] used by storage, configuration and transport code
//! - Database-level errors that aggregate per-entry failures
//! - The borrow taxonomy ([`SubtaskError`]) with stable reserved codes
//!   ([`BorrowErrorCode`]) for precise assertions by callers and UI layers

use crate::types::BookId;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for book-borrow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for book-borrow
///
/// Each variant includes contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "storage.root")
        key: Option<String>,
    },

    /// Book database error
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Format or DRM handle error
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A string could not be parsed as a book identifier
    #[error("invalid book id: {0}")]
    InvalidBookId(String),

    /// A string could not be parsed as a MIME type
    #[error("invalid MIME type: {0}")]
    InvalidMimeType(String),

    /// A URI could not be parsed or resolved
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// Operation not supported (missing engine, unknown scheme, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(e) => match e {
                DatabaseError::NonexistentEntry { .. } => "nonexistent_entry",
                DatabaseError::OpenFailed { .. } => "database_open_failed",
                DatabaseError::DeleteFailed { .. } => "entry_delete_failed",
                DatabaseError::MetadataUnreadable { .. } => "metadata_unreadable",
            },
            Error::Format(e) => match e {
                FormatError::NoFormatHandle { .. } => "no_format_handle",
                FormatError::WrongDrmKind { .. } => "wrong_drm_kind",
                FormatError::UnsupportedVersion { .. } => "unsupported_version",
            },
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::InvalidBookId(_) => "invalid_book_id",
            Error::InvalidMimeType(_) => "invalid_mime_type",
            Error::InvalidUri(_) => "invalid_uri",
            Error::NotSupported(_) => "not_supported",
            Error::Other(_) => "internal_error",
        }
    }
}

/// One failure collected while processing a directory or a set of handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    /// The path the failure relates to
    pub path: PathBuf,
    /// Human-readable reason
    pub reason: String,
}

impl EntryFailure {
    /// Create a failure record for a path
    pub fn new(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for EntryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

fn join_failures(failures: &[EntryFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Book database errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// No entry exists for the requested book
    #[error("nonexistent book entry: {id}")]
    NonexistentEntry {
        /// The requested book
        id: BookId,
    },

    /// One or more entries could not be opened; nothing was opened
    #[error(
        "failed to open book database at {}: {} failure(s): {}",
        directory.display(),
        failures.len(),
        join_failures(failures)
    )]
    OpenFailed {
        /// The database directory
        directory: PathBuf,
        /// Every failure encountered while scanning
        failures: Vec<EntryFailure>,
    },

    /// One or more format handles could not delete their data; the entry was kept
    #[error(
        "failed to delete book {id}: {} failure(s): {}",
        failures.len(),
        join_failures(failures)
    )]
    DeleteFailed {
        /// The book being deleted
        id: BookId,
        /// Every per-format failure
        failures: Vec<EntryFailure>,
    },

    /// A metadata file is missing or could not be parsed
    #[error("unreadable metadata at {}: {reason}", path.display())]
    MetadataUnreadable {
        /// The metadata file
        path: PathBuf,
        /// Why it could not be read
        reason: String,
    },
}

/// Format and DRM handle errors
#[derive(Debug, Error)]
pub enum FormatError {
    /// The book has no format handle able to hold the given content type
    #[error("no format handle for content type {content_type}")]
    NoFormatHandle {
        /// The content type that could not be placed
        content_type: String,
    },

    /// A DRM mutator was called on a handle of another kind
    #[error("expected DRM kind {expected} but the format uses {actual}")]
    WrongDrmKind {
        /// The kind the mutator requires
        expected: String,
        /// The kind currently active
        actual: String,
    },

    /// A persisted document has a schema version with no registered decoder
    #[error("unsupported {document} version {version}")]
    UnsupportedVersion {
        /// Which document kind was being decoded
        document: &'static str,
        /// The version found in the document
        version: u32,
    },
}

/// Stable reserved codes attached to failed borrow steps.
///
/// The string forms are part of the public contract: UI layers and tests
/// match on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorrowErrorCode {
    /// No registered subtask applies to the current path element
    NoSubtaskAvailable,
    /// The book has no format handle for the terminal content type
    NoFormatHandle,
    /// The server answered with an error status
    HttpRequestFailed,
    /// The request could not be performed at all
    HttpConnectionFailed,
    /// The server returned content of an unexpected type
    HttpContentTypeIncompatible,
    /// Copying from a local content source failed
    ContentCopyFailed,
    /// No Adobe DRM engine is configured
    AcsNotSupported,
    /// Pre-activation (vendor/token) Adobe credentials are missing
    AcsNoCredentialsPre,
    /// Post-activation (device) Adobe credentials are missing
    AcsNoCredentialsPost,
    /// The Adobe engine did not finish within the bounded wait
    AcsTimedOut,
    /// The Adobe engine reported a failure
    AcsFulfillmentFailed,
    /// The path has no element after the ACSM describing the final content
    AcsMissingFinalType,
    /// No AxisNow service is configured
    AxisNotSupported,
    /// The account holds no credentials usable for AxisNow
    AxisNoCredentials,
    /// The AxisNow service did not finish within the bounded wait
    AxisTimedOut,
    /// The AxisNow service reported a failure
    AxisFulfillmentFailed,
    /// An audio book manifest could not be parsed
    AudioBookManifestInvalid,
    /// A bearer token document could not be parsed
    BearerTokenInvalid,
    /// The loan request failed
    LoanFailed,
    /// The loan response could not be parsed
    LoanParseFailed,
    /// The loan response has no acquisition continuing the path
    LoanMissingAcquisition,
    /// SAML download selected without SAML credentials
    SamlNoCredentials,
    /// Writing to the book database failed
    PersistenceFailed,
}

impl BorrowErrorCode {
    /// The stable string form of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSubtaskAvailable => "no_subtask_available",
            Self::NoFormatHandle => "no_format_handle",
            Self::HttpRequestFailed => "http_request_failed",
            Self::HttpConnectionFailed => "http_connection_failed",
            Self::HttpContentTypeIncompatible => "http_content_type_incompatible",
            Self::ContentCopyFailed => "content_copy_failed",
            Self::AcsNotSupported => "acs_not_supported",
            Self::AcsNoCredentialsPre => "acs_no_credentials_pre",
            Self::AcsNoCredentialsPost => "acs_no_credentials_post",
            Self::AcsTimedOut => "acs_timed_out",
            Self::AcsFulfillmentFailed => "acs_fulfillment_failed",
            Self::AcsMissingFinalType => "acs_missing_final_type",
            Self::AxisNotSupported => "axis_not_supported",
            Self::AxisNoCredentials => "axis_no_credentials",
            Self::AxisTimedOut => "axis_timed_out",
            Self::AxisFulfillmentFailed => "axis_fulfillment_failed",
            Self::AudioBookManifestInvalid => "audiobook_manifest_invalid",
            Self::BearerTokenInvalid => "bearer_token_invalid",
            Self::LoanFailed => "loan_failed",
            Self::LoanParseFailed => "loan_parse_failed",
            Self::LoanMissingAcquisition => "loan_missing_acquisition",
            Self::SamlNoCredentials => "saml_no_credentials",
            Self::PersistenceFailed => "persistence_failed",
        }
    }
}

impl fmt::Display for BorrowErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, cloneable error cause kept on failed steps.
pub type ErrorCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// A failed subtask: reserved code, message, optional underlying cause.
#[derive(Debug, Clone)]
pub struct SubtaskFailure {
    /// Stable reserved code
    pub code: BorrowErrorCode,
    /// Human-readable message
    pub message: String,
    /// The original error, if any
    pub cause: Option<ErrorCause>,
}

impl fmt::Display for SubtaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

/// Outcome of a subtask that did not complete normally.
#[derive(Debug, Clone, Error)]
pub enum SubtaskError {
    /// The borrow was cancelled; never reported as an ordinary failure
    #[error("cancelled")]
    Cancelled,

    /// The subtask stopped the walk without failing (holds, DRM fulfillment)
    #[error("halted early")]
    HaltedEarly,

    /// The subtask failed
    #[error("subtask failed: {0}")]
    Failed(SubtaskFailure),
}

impl SubtaskError {
    /// Create a failure with no underlying cause
    pub fn failed(code: BorrowErrorCode, message: impl Into<String>) -> Self {
        Self::Failed(SubtaskFailure {
            code,
            message: message.into(),
            cause: None,
        })
    }

    /// Create a failure preserving the underlying cause
    pub fn failed_with<E>(code: BorrowErrorCode, message: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(SubtaskFailure {
            code,
            message: message.into(),
            cause: Some(Arc::new(cause)),
        })
    }

    /// The reserved code, for failures
    pub fn code(&self) -> Option<BorrowErrorCode> {
        match self {
            Self::Failed(f) => Some(f.code),
            Self::Cancelled | Self::HaltedEarly => None,
        }
    }
}

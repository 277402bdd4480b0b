//! Core types for book-borrow

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

/// Stable identifier for a book, derived from its catalog entry id
///
/// The identifier is the lowercase hex SHA-256 digest of the OPDS entry id,
/// which makes it safe to use as a directory name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BookId(String);

impl BookId {
    /// Derive the identifier for a catalog entry id
    pub fn from_entry_id(entry_id: &str) -> Self {
        let digest = Sha256::digest(entry_id.as_bytes());
        let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
        Self(hex)
    }

    /// Parse an identifier previously produced by [`BookId::from_entry_id`]
    pub fn parse(text: &str) -> Result<Self> {
        let valid = text.len() == 64
            && text
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if valid {
            Ok(Self(text.to_string()))
        } else {
            Err(Error::InvalidBookId(text.to_string()))
        }
    }

    /// The identifier as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for BookId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BookId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<BookId> for String {
    fn from(id: BookId) -> Self {
        id.0
    }
}

/// Unique identifier for a library account
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    /// Create a fresh random account identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single HTTP cookie carried by SAML sessions
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
}

/// How the account authenticates against the circulation server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountAuth {
    /// HTTP basic authentication
    Basic {
        /// Barcode or user name
        username: String,
        /// PIN or password
        password: String,
    },
    /// OAuth access token obtained through an intermediary
    OAuth {
        /// Bearer access token
        access_token: String,
    },
    /// SAML 2.0 session
    Saml2 {
        /// Bearer access token issued after the SAML exchange
        access_token: String,
        /// Identity-provider session cookies
        #[serde(default)]
        cookies: Vec<Cookie>,
    },
}

/// Adobe DRM device activation state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdobePostActivation {
    /// Activated device identifier
    pub device_id: String,
    /// Adobe user identifier
    pub user_id: String,
}

/// Adobe DRM credentials held by an account
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdobeCredentials {
    /// Vendor identifier
    pub vendor_id: String,
    /// Short-lived client token used for activation
    pub client_token: String,
    /// Present once the device has been activated
    #[serde(default)]
    pub post_activation: Option<AdobePostActivation>,
}

/// Credentials attached to a logged-in account
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCredentials {
    /// Circulation authentication
    pub auth: AccountAuth,
    /// Adobe DRM credentials, if the library uses Adobe DRM
    #[serde(default)]
    pub adobe: Option<AdobeCredentials>,
}

/// The parts of an account that borrowing consults
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    /// Account identifier
    pub id: AccountId,
    /// Credentials, if logged in
    #[serde(default)]
    pub credentials: Option<AccountCredentials>,
}

impl AccountState {
    /// An account that is not logged in
    pub fn anonymous(id: AccountId) -> Self {
        Self {
            id,
            credentials: None,
        }
    }

    /// An account logged in with the given credentials
    pub fn logged_in(id: AccountId, credentials: AccountCredentials) -> Self {
        Self {
            id,
            credentials: Some(credentials),
        }
    }

    /// True if the account holds SAML 2.0 credentials
    pub fn is_saml(&self) -> bool {
        matches!(
            self.credentials,
            Some(AccountCredentials {
                auth: AccountAuth::Saml2 { .. },
                ..
            })
        )
    }

    /// Adobe credentials, if any
    pub fn adobe(&self) -> Option<&AdobeCredentials> {
        self.credentials.as_ref().and_then(|c| c.adobe.as_ref())
    }
}

/// Borrowing status of a book, as published to observers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BookStatus {
    /// A loan request is in flight
    RequestingLoan,
    /// The book is on loan and can be downloaded
    Loaned,
    /// The book is on hold
    Held {
        /// Queue position, if known
        position: Option<u32>,
    },
    /// A hold is ready to be borrowed
    HoldReady,
    /// Content is being fetched
    Downloading {
        /// Units received so far
        received: u64,
        /// Units expected in total, if known
        expected: Option<u64>,
        /// Current throughput
        bytes_per_second: u64,
        /// Human-readable phase description
        message: String,
    },
    /// The identity provider requires the user to log in
    DownloadWaitingForExternalAuthentication {
        /// Where the user must authenticate
        uri: Url,
    },
    /// Content was fetched and persisted
    Downloaded,
    /// The borrow was cancelled
    Cancelled,
    /// The loan request failed
    FailedLoan,
    /// Fetching or persisting content failed
    FailedDownload,
}

impl BookStatus {
    /// True for the terminal download-success state
    pub fn is_downloaded(&self) -> bool {
        matches!(self, BookStatus::Downloaded)
    }
}

/// Status change broadcast to subscribers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookStatusEvent {
    /// The book whose status changed
    pub id: BookId,
    /// The new status
    pub status: BookStatus,
}

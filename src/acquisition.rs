//! Catalog entries and acquisition paths.
//!
//! An OPDS acquisition names a first MIME type and, through nested indirect
//! acquisitions, the chain of types that must be traversed to reach the final
//! content. [`AcquisitionPath::linearize`] flattens that tree into one path per
//! leaf.

use crate::config::FormatSupport;
use crate::error::{Error, Result};
use crate::mime::MimeType;
use crate::types::BookId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Relation of an acquisition link
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionRelation {
    /// Plain acquisition
    #[default]
    Generic,
    /// Borrow from the library
    Borrow,
    /// Freely available
    OpenAccess,
    /// Purchase
    Buy,
    /// Preview sample
    Sample,
    /// Subscription
    Subscribe,
}

/// Indirect acquisition: a type reached after fetching the enclosing one
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndirectAcquisition {
    /// MIME type of this step
    pub mime_type: MimeType,
    /// Further steps
    #[serde(default)]
    pub indirect: Vec<IndirectAcquisition>,
}

/// One acquisition link of a catalog entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acquisition {
    /// Link relation
    #[serde(default)]
    pub relation: AcquisitionRelation,
    /// Link target
    pub href: Url,
    /// MIME type served at `href`
    pub mime_type: MimeType,
    /// Types reached after fetching `href`
    #[serde(default)]
    pub indirect: Vec<IndirectAcquisition>,
}

/// Circulation availability of a catalog entry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Availability {
    /// Can be borrowed now
    Loanable,
    /// Currently on loan to this account
    Loaned {
        /// Loan start
        #[serde(default)]
        start: Option<DateTime<Utc>>,
        /// Loan end
        #[serde(default)]
        end: Option<DateTime<Utc>>,
    },
    /// Can be placed on hold
    Holdable,
    /// On hold for this account
    Held {
        /// Queue position
        #[serde(default)]
        position: Option<u32>,
        /// Hold start
        #[serde(default)]
        start: Option<DateTime<Utc>>,
        /// Estimated availability
        #[serde(default)]
        end: Option<DateTime<Utc>>,
    },
    /// A hold is ready for checkout
    HoldReady {
        /// Checkout deadline
        #[serde(default)]
        end: Option<DateTime<Utc>>,
    },
    /// Free to download
    OpenAccess,
    /// Loan revoked
    Revoked,
    /// Not available to this account
    #[default]
    Unavailable,
}

/// A catalog entry as admitted into the book database
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    /// Catalog entry id (the source of the [`BookId`])
    pub id: String,
    /// Title
    pub title: String,
    /// Authors
    #[serde(default)]
    pub authors: Vec<String>,
    /// Last update time
    pub updated: DateTime<Utc>,
    /// Circulation availability
    #[serde(default)]
    pub availability: Availability,
    /// Acquisition links
    #[serde(default)]
    pub acquisitions: Vec<Acquisition>,
}

impl FeedEntry {
    /// The book identifier for this entry
    pub fn book_id(&self) -> BookId {
        BookId::from_entry_id(&self.id)
    }

    /// Final content types reachable through any acquisition, in link order
    /// and without duplicates
    pub fn acquisition_content_types(&self) -> Vec<MimeType> {
        let mut types: Vec<MimeType> = Vec::new();
        for acquisition in &self.acquisitions {
            for path in AcquisitionPath::linearize(acquisition) {
                let final_type = path.final_content_type().clone();
                if !types.contains(&final_type) {
                    types.push(final_type);
                }
            }
        }
        types
    }
}

/// Parses catalog entries returned by circulation servers
///
/// OPDS XML parsing is provided by the embedding application; this crate ships
/// a JSON implementation matching the `meta.json` representation.
pub trait FeedEntryParser: Send + Sync {
    /// Parse one entry
    fn parse(&self, bytes: &[u8]) -> Result<FeedEntry>;
}

/// Parses entries serialized as JSON
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonFeedEntryParser;

impl FeedEntryParser for JsonFeedEntryParser {
    fn parse(&self, bytes: &[u8]) -> Result<FeedEntry> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// One step of an acquisition path
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionPathElement {
    /// Where to fetch this step; later steps usually learn their target at runtime
    pub target: Option<Url>,
    /// MIME type of this step
    pub mime_type: MimeType,
}

impl AcquisitionPathElement {
    /// Create an element
    pub fn new(target: Option<Url>, mime_type: MimeType) -> Self {
        Self { target, mime_type }
    }
}

/// Ordered, non-empty chain of acquisition steps; the last is the final content
///
/// Deserialization goes through [`AcquisitionPath::new`], so an empty
/// `elements` list is rejected there too.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AcquisitionPath {
    elements: Vec<AcquisitionPathElement>,
    #[serde(skip)]
    final_type: MimeType,
}

impl<'de> Deserialize<'de> for AcquisitionPath {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Stored {
            elements: Vec<AcquisitionPathElement>,
        }

        let stored = Stored::deserialize(deserializer)?;
        Self::new(stored.elements).map_err(serde::de::Error::custom)
    }
}

impl AcquisitionPath {
    /// Create a path from its elements
    pub fn new(elements: Vec<AcquisitionPathElement>) -> Result<Self> {
        let Some(last) = elements.last() else {
            return Err(Error::Other("acquisition path must not be empty".into()));
        };
        let final_type = last.mime_type.clone();
        Ok(Self {
            elements,
            final_type,
        })
    }

    /// A single-step path
    pub fn single(target: Url, mime_type: MimeType) -> Self {
        Self {
            final_type: mime_type.clone(),
            elements: vec![AcquisitionPathElement::new(Some(target), mime_type)],
        }
    }

    /// Elements in order
    pub fn elements(&self) -> &[AcquisitionPathElement] {
        &self.elements
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Always false; paths are non-empty
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The final content type
    pub fn final_content_type(&self) -> &MimeType {
        &self.final_type
    }

    /// Flatten an acquisition and its indirect tree into one path per leaf
    pub fn linearize(acquisition: &Acquisition) -> Vec<AcquisitionPath> {
        let head = AcquisitionPathElement::new(
            Some(acquisition.href.clone()),
            acquisition.mime_type.clone(),
        );
        if acquisition.indirect.is_empty() {
            return vec![AcquisitionPath {
                final_type: head.mime_type.clone(),
                elements: vec![head],
            }];
        }

        let mut paths = Vec::new();
        for indirect in &acquisition.indirect {
            let mut prefix = vec![head.clone()];
            Self::walk_indirect(indirect, &mut prefix, &mut paths);
        }
        paths
    }

    fn walk_indirect(
        node: &IndirectAcquisition,
        prefix: &mut Vec<AcquisitionPathElement>,
        out: &mut Vec<AcquisitionPath>,
    ) {
        prefix.push(AcquisitionPathElement::new(None, node.mime_type.clone()));
        if node.indirect.is_empty() {
            out.push(AcquisitionPath {
                elements: prefix.clone(),
                final_type: node.mime_type.clone(),
            });
        } else {
            for child in &node.indirect {
                Self::walk_indirect(child, prefix, out);
            }
        }
        prefix.pop();
    }

    /// Pick the first path of the entry whose every step the policy supports
    ///
    /// Borrow and open-access links are preferred over other relations.
    pub fn preferred(entry: &FeedEntry, support: &FormatSupport) -> Option<AcquisitionPath> {
        let ranked = entry
            .acquisitions
            .iter()
            .filter(|a| {
                matches!(
                    a.relation,
                    AcquisitionRelation::Borrow | AcquisitionRelation::OpenAccess
                )
            })
            .chain(entry.acquisitions.iter().filter(|a| {
                !matches!(
                    a.relation,
                    AcquisitionRelation::Borrow | AcquisitionRelation::OpenAccess
                )
            }));

        ranked
            .flat_map(AcquisitionPath::linearize)
            .find(|path| support.supports_path(path))
    }
}

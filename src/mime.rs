//! MIME types as they appear in OPDS acquisitions and HTTP responses.
//!
//! Dispatch compares the lowercase `type/subtype` pair; parameters are kept
//! (sorted by key) so that profile-qualified types stay distinct when they
//! need to.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// EPUB content
pub const EPUB: &str = "application/epub+zip";
/// PDF content
pub const PDF: &str = "application/pdf";
/// Adobe Content Server Message (fulfillment token)
pub const ACSM: &str = "application/vnd.adobe.adept+xml";
/// AxisNow fulfillment token
pub const AXIS_NOW: &str = "application/vnd.librarysimplified.axisnow+json";
/// Bearer-token document wrapping the final download location
pub const BEARER_TOKEN: &str = "application/vnd.librarysimplified.bearer-token+json";
/// Atom documents; OPDS entries carry `type=entry` on top of this
pub const OPDS_ENTRY: &str = "application/atom+xml";
/// Readium web-publication audio book manifest
pub const AUDIOBOOK_MANIFEST: &str = "application/audiobook+json";
/// Findaway audio book license
pub const FINDAWAY_AUDIOBOOK: &str = "application/vnd.librarysimplified.findaway.license+json";
/// Overdrive audio book manifest
pub const OVERDRIVE_AUDIOBOOK: &str = "application/vnd.overdrive.circulation.api+json";
/// HTML (identity-provider login pages)
pub const HTML: &str = "text/html";
/// RFC 7807 problem report
pub const PROBLEM_REPORT: &str = "application/api-problem+json";
/// Generic binary content
pub const OCTET_STREAM: &str = "application/octet-stream";

/// A parsed MIME type: `type/subtype` plus `;key=value` parameters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MimeType {
    type_: String,
    subtype: String,
    parameters: Vec<(String, String)>,
}

impl MimeType {
    /// Parse a MIME type string such as `application/atom+xml;type=entry`
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = text.split(';');
        let essence = parts.next().unwrap_or_default().trim();
        let (type_, subtype) = essence
            .split_once('/')
            .ok_or_else(|| Error::InvalidMimeType(text.to_string()))?;
        let type_ = type_.trim();
        let subtype = subtype.trim();
        if type_.is_empty() || subtype.is_empty() || subtype.contains('/') {
            return Err(Error::InvalidMimeType(text.to_string()));
        }

        let mut parameters = Vec::new();
        for raw in parts {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let (key, value) = raw
                .split_once('=')
                .ok_or_else(|| Error::InvalidMimeType(text.to_string()))?;
            parameters.push((
                key.trim().to_ascii_lowercase(),
                value.trim().trim_matches('"').to_string(),
            ));
        }
        parameters.sort();

        Ok(Self {
            type_: type_.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            parameters,
        })
    }

    /// Build a MIME type from one of the known `type/subtype` constants
    pub fn known(essence: &str) -> Self {
        let (type_, subtype) = essence.split_once('/').unwrap_or((essence, ""));
        Self {
            type_: type_.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            parameters: Vec::new(),
        }
    }

    /// Return a copy with an added parameter
    #[must_use]
    pub fn with_parameter(mut self, key: &str, value: &str) -> Self {
        self.parameters
            .push((key.to_ascii_lowercase(), value.to_string()));
        self.parameters.sort();
        self
    }

    /// The lowercase `type/subtype` pair without parameters
    pub fn full_type(&self) -> String {
        format!("{}/{}", self.type_, self.subtype)
    }

    /// Look up a parameter value
    pub fn parameter(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.parameters
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// True if the `type/subtype` pair equals `essence` (parameters ignored)
    pub fn is(&self, essence: &str) -> bool {
        match essence.split_once('/') {
            Some((t, s)) => self.type_.eq_ignore_ascii_case(t) && self.subtype.eq_ignore_ascii_case(s),
            None => false,
        }
    }

    /// True if both types share the same `type/subtype` pair
    pub fn is_compatible_with(&self, other: &MimeType) -> bool {
        self.type_ == other.type_ && self.subtype == other.subtype
    }

    /// EPUB content
    pub fn epub() -> Self {
        Self::known(EPUB)
    }

    /// PDF content
    pub fn pdf() -> Self {
        Self::known(PDF)
    }

    /// Adobe ACSM token
    pub fn acsm() -> Self {
        Self::known(ACSM)
    }

    /// AxisNow token
    pub fn axis_now() -> Self {
        Self::known(AXIS_NOW)
    }

    /// Bearer-token document
    pub fn bearer_token() -> Self {
        Self::known(BEARER_TOKEN)
    }

    /// OPDS acquisition feed entry
    pub fn opds_entry() -> Self {
        Self::known(OPDS_ENTRY)
            .with_parameter("type", "entry")
            .with_parameter("profile", "opds-catalog")
    }

    /// True for a single OPDS entry
    ///
    /// Requires `type=entry`; a `profile`, when given, must be `opds-catalog`.
    /// Bare `application/atom+xml` is a feed and does not qualify.
    pub fn is_opds_entry(&self) -> bool {
        self.is(OPDS_ENTRY)
            && self.parameter("type") == Some("entry")
            && self.parameter("profile").is_none_or(|p| p == "opds-catalog")
    }

    /// Readium audio book manifest
    pub fn audiobook_manifest() -> Self {
        Self::known(AUDIOBOOK_MANIFEST)
    }

    /// True for any audio book manifest flavour this crate understands
    pub fn is_audiobook_manifest(&self) -> bool {
        self.is(AUDIOBOOK_MANIFEST)
            || self.is(FINDAWAY_AUDIOBOOK)
            || (self.is(OVERDRIVE_AUDIOBOOK) && self.parameter("profile") == Some("audiobook"))
    }

    /// True for content that is a final, directly downloadable book file
    pub fn is_downloadable_book(&self) -> bool {
        self.is(EPUB) || self.is(PDF)
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_, self.subtype)?;
        for (k, v) in &self.parameters {
            write!(f, ";{k}={v}")?;
        }
        Ok(())
    }
}

impl FromStr for MimeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MimeType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<MimeType> for String {
    fn from(value: MimeType) -> Self {
        value.to_string()
    }
}

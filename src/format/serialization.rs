//! Versioned JSON documents for reading state
//!
//! Reading positions, bookmarks and player positions are stored as JSON
//! objects carrying a `version` field. Each document kind has a
//! [`SchemaRegistry`] mapping versions to decoders. Documents are always
//! written at [`CURRENT_VERSION`]; a document without a `version` field is
//! decoded as version 1.
//!
//! Version 1 layouts:
//! - bookmark: `{"content_cfi": "...", "time": "..."}`
//! - last-read location: a bare version 1 bookmark
//! - bookmark list: a bare array of version 1 bookmarks
//! - player position: `{"chapter": 3, "offset_ms": 1200}`
//! - PDF page: a bare number

use crate::error::{Error, FormatError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Version written by every encoder
pub const CURRENT_VERSION: u32 = 2;

/// Version assumed when a document has no `version` field
pub const DEFAULT_VERSION: u32 = 1;

/// A reading location inside an EPUB
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Opaque reader location (CFI or locator JSON)
    pub location: String,
    /// When the location was recorded
    pub time: DateTime<Utc>,
    /// Chapter title at the location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_title: Option<String>,
    /// Progress through the whole book, 0.0 to 1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_progress: Option<f64>,
}

/// Playback position inside an audio book
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPosition {
    /// Part (disc) index
    pub part: u32,
    /// Chapter index within the part
    pub chapter: u32,
    /// Offset into the chapter in milliseconds
    pub offset_ms: u64,
}

type Decoder<T> = fn(Value) -> Result<T>;
type Encoder<T> = fn(&T) -> Result<Value>;

/// Version → decoder table for one document kind
pub struct SchemaRegistry<T> {
    document: &'static str,
    decoders: BTreeMap<u32, Decoder<T>>,
    encoder: Encoder<T>,
}

impl<T> SchemaRegistry<T> {
    fn new(document: &'static str, encoder: Encoder<T>) -> Self {
        Self {
            document,
            decoders: BTreeMap::new(),
            encoder,
        }
    }

    fn register(mut self, version: u32, decoder: Decoder<T>) -> Self {
        self.decoders.insert(version, decoder);
        self
    }

    /// Versions this registry can decode
    pub fn versions(&self) -> Vec<u32> {
        self.decoders.keys().copied().collect()
    }

    /// Decode a stored document of any registered version
    pub fn decode(&self, bytes: &[u8]) -> Result<T> {
        let value: Value = serde_json::from_slice(bytes)?;
        let version = document_version(&value).ok_or(FormatError::UnsupportedVersion {
            document: self.document,
            version: u32::MAX,
        })?;
        let decoder = self
            .decoders
            .get(&version)
            .ok_or(FormatError::UnsupportedVersion {
                document: self.document,
                version,
            })?;
        decoder(value)
    }

    /// Encode at [`CURRENT_VERSION`]
    pub fn encode(&self, value: &T) -> Result<Vec<u8>> {
        let mut body = (self.encoder)(value)?;
        match body.as_object_mut() {
            Some(map) => {
                map.insert("version".into(), Value::from(CURRENT_VERSION));
            }
            None => {
                return Err(Error::Other(format!(
                    "{} encoder produced a non-object document",
                    self.document
                )));
            }
        }
        Ok(serde_json::to_vec_pretty(&body)?)
    }
}

/// The declared version, `DEFAULT_VERSION` when absent, `None` when malformed
fn document_version(value: &Value) -> Option<u32> {
    match value.as_object().and_then(|map| map.get("version")) {
        None => Some(DEFAULT_VERSION),
        Some(v) => v.as_u64().and_then(|v| u32::try_from(v).ok()),
    }
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

#[derive(Deserialize)]
struct BookmarkV1 {
    content_cfi: String,
    time: DateTime<Utc>,
}

impl From<BookmarkV1> for Bookmark {
    fn from(v1: BookmarkV1) -> Self {
        Bookmark {
            location: v1.content_cfi,
            time: v1.time,
            chapter_title: None,
            book_progress: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct LastReadV2 {
    location: Bookmark,
}

#[derive(Serialize, Deserialize)]
struct BookmarksV2 {
    bookmarks: Vec<Bookmark>,
}

#[derive(Deserialize)]
struct PositionV1 {
    chapter: u32,
    offset_ms: u64,
}

#[derive(Serialize, Deserialize)]
struct PositionV2 {
    position: PlayerPosition,
}

#[derive(Serialize, Deserialize)]
struct PageV2 {
    page: u32,
}

/// EPUB last-read location
pub static LAST_READ_LOCATION: LazyLock<SchemaRegistry<Bookmark>> = LazyLock::new(|| {
    SchemaRegistry::<Bookmark>::new("last read location", |b| {
        Ok(serde_json::to_value(LastReadV2 {
            location: b.clone(),
        })?)
    })
    .register(1, |v| from_value::<BookmarkV1>(v).map(Bookmark::from))
    .register(2, |v| from_value::<LastReadV2>(v).map(|d| d.location))
});

/// EPUB bookmark list
pub static BOOKMARKS: LazyLock<SchemaRegistry<Vec<Bookmark>>> = LazyLock::new(|| {
    SchemaRegistry::<Vec<Bookmark>>::new("bookmarks", |b| {
        Ok(serde_json::to_value(BookmarksV2 {
            bookmarks: b.clone(),
        })?)
    })
    .register(1, |v| {
        from_value::<Vec<BookmarkV1>>(v).map(|list| list.into_iter().map(Bookmark::from).collect())
    })
    .register(2, |v| from_value::<BookmarksV2>(v).map(|d| d.bookmarks))
});

/// Audio book player position
pub static PLAYER_POSITION: LazyLock<SchemaRegistry<PlayerPosition>> = LazyLock::new(|| {
    SchemaRegistry::<PlayerPosition>::new("player position", |p| {
        Ok(serde_json::to_value(PositionV2 { position: *p })?)
    })
    .register(1, |v| {
        from_value::<PositionV1>(v).map(|p| PlayerPosition {
            part: 0,
            chapter: p.chapter,
            offset_ms: p.offset_ms,
        })
    })
    .register(2, |v| from_value::<PositionV2>(v).map(|d| d.position))
});

/// PDF last-read page
pub static LAST_READ_PAGE: LazyLock<SchemaRegistry<u32>> = LazyLock::new(|| {
    SchemaRegistry::<u32>::new("last read page", |p| Ok(serde_json::to_value(PageV2 { page: *p })?))
        .register(1, from_value::<u32>)
        .register(2, |v| from_value::<PageV2>(v).map(|d| d.page))
});

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bookmark() -> Bookmark {
        Bookmark {
            location: "epubcfi(/6/4!/4/2)".into(),
            time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            chapter_title: Some("One".into()),
            book_progress: Some(0.25),
        }
    }

    #[test]
    fn documents_are_written_at_current_version() {
        let bytes = BOOKMARKS.encode(&vec![bookmark()]).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["version"], CURRENT_VERSION);
        assert_eq!(BOOKMARKS.decode(&bytes).unwrap(), vec![bookmark()]);
    }

    #[test]
    fn unversioned_bookmarks_decode_as_version_one() {
        let legacy = br#"[{"content_cfi": "epubcfi(/6/2)", "time": "2020-01-01T00:00:00Z"}]"#;
        let decoded = BOOKMARKS.decode(legacy).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].location, "epubcfi(/6/2)");
        assert_eq!(decoded[0].chapter_title, None);

        let legacy_location = br#"{"content_cfi": "epubcfi(/6/8)", "time": "2020-01-01T00:00:00Z"}"#;
        assert_eq!(
            LAST_READ_LOCATION.decode(legacy_location).unwrap().location,
            "epubcfi(/6/8)"
        );
    }

    #[test]
    fn legacy_position_and_page() {
        let position = PLAYER_POSITION
            .decode(br#"{"chapter": 3, "offset_ms": 1200}"#)
            .unwrap();
        assert_eq!(
            position,
            PlayerPosition {
                part: 0,
                chapter: 3,
                offset_ms: 1200
            }
        );
        assert_eq!(LAST_READ_PAGE.decode(b"17").unwrap(), 17);
        let current = LAST_READ_PAGE.encode(&17).unwrap();
        assert_eq!(LAST_READ_PAGE.decode(&current).unwrap(), 17);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let err = BOOKMARKS
            .decode(br#"{"version": 9, "bookmarks": []}"#)
            .unwrap_err();
        assert_eq!(err.error_code(), "unsupported_version");
        assert_eq!(BOOKMARKS.versions(), vec![1, 2]);
    }
}

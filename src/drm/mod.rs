//! DRM information handles
//!
//! Every EPUB or PDF format carries exactly one active DRM kind. The kind is
//! recorded in a plain-text marker file (`<format>-drm.txt`) which is
//! authoritative when a book is reopened. When the marker is missing or
//! unreadable the kind is inferred from which kind-specific artifacts exist,
//! defaulting to [`DrmKind::None`].
//!
//! Stateless kinds (none, LCP) have no artifacts. Adobe ACS and AxisNow keep
//! their tokens, rights and keys beside the book file, prefixed by the format
//! they belong to.

mod acs;
mod axis;

pub use self::acs::{AcsDrmHandle, AcsInformation, AdobeLoan, AdobeRights, AdobeRightsUpdate};
pub use self::axis::{AxisDrmHandle, AxisInformation};

use crate::error::{Error, FormatError, Result};
use crate::storage::{FileStore, read_text};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Callback a handle invokes after its snapshot changed
///
/// Always called with no handle lock held.
pub type OnUpdate = Arc<dyn Fn() + Send + Sync>;

/// A callback that does nothing, for handles with no owner
pub fn no_update() -> OnUpdate {
    Arc::new(|| {})
}

/// The DRM scheme protecting a book file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DrmKind {
    /// Unprotected
    #[default]
    None,
    /// Readium LCP; license is embedded in the book file
    Lcp,
    /// Adobe Content Server
    Acs,
    /// AxisNow
    Axis,
}

impl DrmKind {
    /// Contents of the kind marker file
    pub fn marker(&self) -> &'static str {
        match self {
            DrmKind::None => "NONE",
            DrmKind::Lcp => "LCP",
            DrmKind::Acs => "ACS",
            DrmKind::Axis => "AXIS",
        }
    }

    /// Parse marker file contents
    pub fn from_marker(text: &str) -> Option<Self> {
        match text.trim() {
            "NONE" => Some(DrmKind::None),
            "LCP" => Some(DrmKind::Lcp),
            "ACS" => Some(DrmKind::Acs),
            "AXIS" => Some(DrmKind::Axis),
            _ => None,
        }
    }
}

impl fmt::Display for DrmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// Snapshot of the DRM state of one format
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DrmInformation {
    /// Unprotected
    #[default]
    None,
    /// Readium LCP
    Lcp,
    /// Adobe ACS state
    Acs(AcsInformation),
    /// AxisNow state
    Axis(AxisInformation),
}

impl DrmInformation {
    /// The kind of this snapshot
    pub fn kind(&self) -> DrmKind {
        match self {
            DrmInformation::None => DrmKind::None,
            DrmInformation::Lcp => DrmKind::Lcp,
            DrmInformation::Acs(_) => DrmKind::Acs,
            DrmInformation::Axis(_) => DrmKind::Axis,
        }
    }
}

/// Fixed on-disk names of the DRM artifacts of one format
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrmFiles {
    directory: PathBuf,
    prefix: &'static str,
}

impl DrmFiles {
    /// Artifacts of the format `prefix` (`epub`, `pdf`) inside `directory`
    pub fn new(directory: impl Into<PathBuf>, prefix: &'static str) -> Self {
        Self {
            directory: directory.into(),
            prefix,
        }
    }

    fn file(&self, artifact: &str) -> PathBuf {
        self.directory.join(format!("{}-{artifact}", self.prefix))
    }

    /// The kind marker
    pub fn marker(&self) -> PathBuf {
        self.file("drm.txt")
    }

    /// Adobe ACSM fulfillment token
    pub fn acsm(&self) -> PathBuf {
        self.file("meta_adobe.acsm")
    }

    /// Adobe rights document
    pub fn adobe_rights(&self) -> PathBuf {
        self.file("rights_adobe.xml")
    }

    /// Adobe loan metadata
    pub fn adobe_loan(&self) -> PathBuf {
        self.file("meta_adobe.json")
    }

    /// AxisNow fulfillment token
    pub fn axis_token(&self) -> PathBuf {
        self.file("meta_axis_token.json")
    }

    /// AxisNow license
    pub fn axis_license(&self) -> PathBuf {
        self.file("meta_axis_license.json")
    }

    /// AxisNow user key
    pub fn axis_user_key(&self) -> PathBuf {
        self.file("meta_axis_userkey.txt")
    }

    /// Artifacts owned by `kind`
    pub fn artifacts(&self, kind: DrmKind) -> Vec<PathBuf> {
        match kind {
            DrmKind::None | DrmKind::Lcp => Vec::new(),
            DrmKind::Acs => vec![self.acsm(), self.adobe_rights(), self.adobe_loan()],
            DrmKind::Axis => vec![
                self.axis_token(),
                self.axis_license(),
                self.axis_user_key(),
            ],
        }
    }

    /// Artifacts of every kind
    pub fn all_artifacts(&self) -> Vec<PathBuf> {
        let mut all = self.artifacts(DrmKind::Acs);
        all.extend(self.artifacts(DrmKind::Axis));
        all
    }
}

/// The active DRM handle of one format
///
/// Stateless kinds carry no handle. Mutators live on the stateful handles,
/// reached through [`DrmHandle::as_acs`] and [`DrmHandle::as_axis`].
#[derive(Clone, Debug)]
pub enum DrmHandle {
    /// Unprotected
    None,
    /// Readium LCP
    Lcp,
    /// Adobe ACS
    Acs(Arc<AcsDrmHandle>),
    /// AxisNow
    Axis(Arc<AxisDrmHandle>),
}

impl DrmHandle {
    /// Open the handle recorded on disk, inferring the kind if the marker is unusable
    pub fn open(store: Arc<dyn FileStore>, files: DrmFiles, on_update: OnUpdate) -> Result<Self> {
        let kind = match read_marker(store.as_ref(), &files) {
            Some(kind) => kind,
            None => infer_kind(store.as_ref(), &files),
        };
        Self::open_kind(kind, store, files, on_update)
    }

    /// Open a handle of a known kind, loading whatever artifacts exist
    pub fn open_kind(
        kind: DrmKind,
        store: Arc<dyn FileStore>,
        files: DrmFiles,
        on_update: OnUpdate,
    ) -> Result<Self> {
        Ok(match kind {
            DrmKind::None => DrmHandle::None,
            DrmKind::Lcp => DrmHandle::Lcp,
            DrmKind::Acs => DrmHandle::Acs(Arc::new(AcsDrmHandle::open(store, files, on_update)?)),
            DrmKind::Axis => {
                DrmHandle::Axis(Arc::new(AxisDrmHandle::open(store, files, on_update)?))
            }
        })
    }

    /// The active kind
    pub fn kind(&self) -> DrmKind {
        match self {
            DrmHandle::None => DrmKind::None,
            DrmHandle::Lcp => DrmKind::Lcp,
            DrmHandle::Acs(_) => DrmKind::Acs,
            DrmHandle::Axis(_) => DrmKind::Axis,
        }
    }

    /// Current state
    pub fn snapshot(&self) -> DrmInformation {
        match self {
            DrmHandle::None => DrmInformation::None,
            DrmHandle::Lcp => DrmInformation::Lcp,
            DrmHandle::Acs(handle) => DrmInformation::Acs((*handle.snapshot()).clone()),
            DrmHandle::Axis(handle) => DrmInformation::Axis((*handle.snapshot()).clone()),
        }
    }

    /// The Adobe handle, if ACS is active
    pub fn as_acs(&self) -> Result<&Arc<AcsDrmHandle>> {
        match self {
            DrmHandle::Acs(handle) => Ok(handle),
            other => Err(wrong_kind(DrmKind::Acs, other.kind())),
        }
    }

    /// The AxisNow handle, if AxisNow is active
    pub fn as_axis(&self) -> Result<&Arc<AxisDrmHandle>> {
        match self {
            DrmHandle::Axis(handle) => Ok(handle),
            other => Err(wrong_kind(DrmKind::Axis, other.kind())),
        }
    }
}

fn wrong_kind(expected: DrmKind, actual: DrmKind) -> Error {
    Error::Format(FormatError::WrongDrmKind {
        expected: expected.to_string(),
        actual: actual.to_string(),
    })
}

/// Read the kind marker; `None` if it is missing or unreadable
pub fn read_marker(store: &dyn FileStore, files: &DrmFiles) -> Option<DrmKind> {
    let path = files.marker();
    match read_text(store, &path) {
        Ok(Some(text)) => {
            let kind = DrmKind::from_marker(&text);
            if kind.is_none() {
                tracing::warn!(path = %path.display(), marker = %text, "unrecognized DRM marker");
            }
            kind
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable DRM marker");
            None
        }
    }
}

/// Infer the kind from which artifacts exist
///
/// ACS artifacts win over AxisNow ones; no artifacts means no DRM.
pub fn infer_kind(store: &dyn FileStore, files: &DrmFiles) -> DrmKind {
    let any_exists = |paths: Vec<PathBuf>| paths.iter().any(|p| store.exists(p));
    let kind = if any_exists(files.artifacts(DrmKind::Acs)) {
        DrmKind::Acs
    } else if any_exists(files.artifacts(DrmKind::Axis)) {
        DrmKind::Axis
    } else {
        DrmKind::None
    };
    tracing::debug!(marker = %files.marker().display(), kind = %kind, "inferred DRM kind");
    kind
}

/// Atomically write the kind marker
pub fn write_marker(store: &dyn FileStore, files: &DrmFiles, kind: DrmKind) -> Result<()> {
    store.write_atomic(&files.marker(), kind.marker().as_bytes())?;
    Ok(())
}

/// Delete every file in `paths`
pub(crate) fn delete_files(store: &dyn FileStore, paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        store.delete(path)?;
    }
    Ok(())
}

/// `Some(path)` if the file exists
pub(crate) fn present(store: &dyn FileStore, path: &Path) -> Option<PathBuf> {
    store.exists(path).then(|| path.to_path_buf())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalFileStore, MemoryFileStore};
    use tempfile::tempdir;

    fn memory_store() -> (Arc<MemoryFileStore>, DrmFiles) {
        let store = Arc::new(MemoryFileStore::new());
        store.create_dir_all(Path::new("/book")).unwrap();
        (store, DrmFiles::new("/book", "epub"))
    }

    #[test]
    fn marker_names_round_trip() {
        for kind in [DrmKind::None, DrmKind::Lcp, DrmKind::Acs, DrmKind::Axis] {
            assert_eq!(DrmKind::from_marker(kind.marker()), Some(kind));
        }
        assert_eq!(DrmKind::from_marker(" ACS\n"), Some(DrmKind::Acs));
        assert_eq!(DrmKind::from_marker("adobe"), None);
    }

    #[test]
    fn artifact_names_are_prefixed_by_format() {
        let files = DrmFiles::new("/b", "pdf");
        assert_eq!(files.marker(), PathBuf::from("/b/pdf-drm.txt"));
        assert_eq!(files.adobe_rights(), PathBuf::from("/b/pdf-rights_adobe.xml"));
        assert_eq!(files.axis_user_key(), PathBuf::from("/b/pdf-meta_axis_userkey.txt"));
    }

    #[test]
    fn marker_is_authoritative_on_reopen() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new());
        let files = DrmFiles::new(dir.path(), "epub");

        for kind in [DrmKind::None, DrmKind::Lcp, DrmKind::Acs, DrmKind::Axis] {
            write_marker(store.as_ref(), &files, kind).unwrap();
            let handle = DrmHandle::open(store.clone(), files.clone(), no_update()).unwrap();
            assert_eq!(handle.kind(), kind);
        }
    }

    #[test]
    fn missing_marker_infers_from_artifacts() {
        let (store, files) = memory_store();
        store.write_atomic(&files.axis_license(), b"{}").unwrap();
        let handle = DrmHandle::open(store.clone(), files.clone(), no_update()).unwrap();
        assert_eq!(handle.kind(), DrmKind::Axis);

        store.write_atomic(&files.acsm(), b"<fulfillmentToken/>").unwrap();
        let handle = DrmHandle::open(store.clone(), files.clone(), no_update()).unwrap();
        assert_eq!(handle.kind(), DrmKind::Acs);
    }

    #[test]
    fn garbage_marker_falls_back_to_inference() {
        let (store, files) = memory_store();
        store.write_atomic(&files.marker(), b"???").unwrap();
        store.write_atomic(&files.adobe_rights(), b"<rights/>").unwrap();
        let handle = DrmHandle::open(store, files, no_update()).unwrap();
        assert_eq!(handle.kind(), DrmKind::Acs);
    }

    #[test]
    fn nothing_on_disk_means_no_drm() {
        let (store, files) = memory_store();
        let handle = DrmHandle::open(store, files, no_update()).unwrap();
        assert_eq!(handle.kind(), DrmKind::None);
        assert_eq!(handle.snapshot(), DrmInformation::None);
    }

    #[test]
    fn mutators_require_matching_kind() {
        let handle = DrmHandle::Lcp;
        let err = handle.as_acs().unwrap_err();
        assert_eq!(err.error_code(), "wrong_drm_kind");
        assert!(handle.as_axis().is_err());
    }
}

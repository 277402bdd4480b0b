//! Adobe ACS rights state

use super::{DrmFiles, OnUpdate, present};
use crate::error::Result;
use crate::storage::FileStore;
use crate::utils::lock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Loan details returned by Adobe fulfillment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdobeLoan {
    /// Adobe loan identifier, needed to return the loan
    pub loan_id: String,
    /// Whether the loan may be returned early
    #[serde(default)]
    pub returnable: bool,
    /// Loan expiry, if Adobe reported one
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

/// Persisted rights: the rights document and the loan it belongs to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdobeRights {
    /// The rights document on disk
    pub file: PathBuf,
    /// Loan details
    pub loan: AdobeLoan,
}

/// New rights to persist
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdobeRightsUpdate {
    /// Raw rights document
    pub rights: Vec<u8>,
    /// Loan details
    pub loan: AdobeLoan,
}

/// Snapshot of Adobe ACS state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcsInformation {
    /// The persisted fulfillment token
    pub acsm_file: Option<PathBuf>,
    /// Rights, once fulfillment succeeded
    pub rights: Option<AdobeRights>,
}

/// Handle over the Adobe artifacts of one format
pub struct AcsDrmHandle {
    store: Arc<dyn FileStore>,
    files: DrmFiles,
    state: Mutex<Arc<AcsInformation>>,
    on_update: OnUpdate,
}

impl fmt::Debug for AcsDrmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcsDrmHandle")
            .field("files", &self.files)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl AcsDrmHandle {
    pub(crate) fn open(
        store: Arc<dyn FileStore>,
        files: DrmFiles,
        on_update: OnUpdate,
    ) -> Result<Self> {
        let acsm_file = present(store.as_ref(), &files.acsm());
        let rights = match (
            present(store.as_ref(), &files.adobe_rights()),
            store.read(&files.adobe_loan())?,
        ) {
            (Some(file), Some(loan)) => Some(AdobeRights {
                file,
                loan: serde_json::from_slice(&loan)?,
            }),
            (None, None) => None,
            (file, _) => {
                tracing::warn!(
                    rights = %files.adobe_rights().display(),
                    has_rights = file.is_some(),
                    "incomplete Adobe rights on disk, ignoring"
                );
                None
            }
        };

        Ok(Self {
            store,
            files,
            state: Mutex::new(Arc::new(AcsInformation { acsm_file, rights })),
            on_update,
        })
    }

    /// Current state
    pub fn snapshot(&self) -> Arc<AcsInformation> {
        lock(&self.state).clone()
    }

    /// Persist the fulfillment token, or delete it with `None`
    pub fn set_acsm_file(&self, data: Option<&[u8]>) -> Result<()> {
        let path = self.files.acsm();
        {
            let mut state = lock(&self.state);
            match data {
                Some(bytes) => self.store.write_atomic(&path, bytes)?,
                None => self.store.delete(&path)?,
            }
            let mut next = (**state).clone();
            next.acsm_file = data.map(|_| path);
            *state = Arc::new(next);
        }
        (self.on_update)();
        Ok(())
    }

    /// Persist rights and loan details, or delete them with `None`
    ///
    /// The rights document is removed first and written last, so a reopen
    /// never pairs it with another loan. After a failure the snapshot holds
    /// no rights, matching what a reopen would load.
    pub fn set_adobe_rights_information(&self, rights: Option<AdobeRightsUpdate>) -> Result<()> {
        let rights_path = self.files.adobe_rights();
        let loan_path = self.files.adobe_loan();
        let result = {
            let mut state = lock(&self.state);
            let (persisted, result) = match rights {
                Some(update) => {
                    let loan = serde_json::to_vec_pretty(&update.loan)?;
                    self.store.delete(&rights_path)?;
                    let written = self
                        .store
                        .write_atomic(&loan_path, &loan)
                        .and_then(|()| self.store.write_atomic(&rights_path, &update.rights));
                    match written {
                        Ok(()) => (
                            Some(AdobeRights {
                                file: rights_path,
                                loan: update.loan,
                            }),
                            Ok(()),
                        ),
                        Err(e) => (None, Err(e.into())),
                    }
                }
                None => {
                    self.store.delete(&rights_path)?;
                    (None, self.store.delete(&loan_path).map_err(Into::into))
                }
            };
            let mut next = (**state).clone();
            next.rights = persisted;
            *state = Arc::new(next);
            result
        };
        (self.on_update)();
        result
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drm::{DrmHandle, DrmInformation, DrmKind, no_update, write_marker};
    use crate::storage::{LocalFileStore, MemoryFileStore};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn loan() -> AdobeLoan {
        AdobeLoan {
            loan_id: "loan-1".into(),
            returnable: true,
            expires: None,
        }
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new());
        let files = DrmFiles::new(dir.path(), "epub");
        write_marker(store.as_ref(), &files, DrmKind::Acs).unwrap();

        let handle = DrmHandle::open(store.clone(), files.clone(), no_update()).unwrap();
        let acs = handle.as_acs().unwrap();
        acs.set_acsm_file(Some(b"<fulfillmentToken/>")).unwrap();
        acs.set_adobe_rights_information(Some(AdobeRightsUpdate {
            rights: b"<rights/>".to_vec(),
            loan: loan(),
        }))
        .unwrap();
        let before = handle.snapshot();

        let reopened = DrmHandle::open(store, files, no_update()).unwrap();
        assert_eq!(reopened.snapshot(), before);
        match before {
            DrmInformation::Acs(info) => {
                assert!(info.acsm_file.is_some());
                assert_eq!(info.rights.unwrap().loan, loan());
            }
            other => panic!("expected ACS, got {other:?}"),
        }
    }

    #[test]
    fn clearing_removes_files_and_notifies() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new());
        let files = DrmFiles::new(dir.path(), "pdf");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = AcsDrmHandle::open(
            store,
            files.clone(),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        handle.set_acsm_file(Some(b"token")).unwrap();
        handle.set_acsm_file(None).unwrap();

        assert!(!files.acsm().exists());
        assert_eq!(handle.snapshot().acsm_file, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn callback_may_read_snapshot() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new());
        let files = DrmFiles::new(dir.path(), "epub");
        let cell: Arc<Mutex<Option<Arc<AcsDrmHandle>>>> = Arc::new(Mutex::new(None));
        let seen = Arc::new(Mutex::new(None));

        let reader = cell.clone();
        let sink = seen.clone();
        let handle = Arc::new(
            AcsDrmHandle::open(
                store,
                files,
                Arc::new(move || {
                    if let Some(h) = reader.lock().unwrap().as_ref() {
                        *sink.lock().unwrap() = Some(h.snapshot());
                    }
                }),
            )
            .unwrap(),
        );
        *cell.lock().unwrap() = Some(handle.clone());

        handle.set_acsm_file(Some(b"token")).unwrap();
        let observed = seen.lock().unwrap().clone().unwrap();
        assert!(observed.acsm_file.is_some());
    }

    fn memory_handle() -> (Arc<MemoryFileStore>, DrmFiles, AcsDrmHandle) {
        let store = Arc::new(MemoryFileStore::new());
        store.create_dir_all(Path::new("/book")).unwrap();
        let files = DrmFiles::new(Path::new("/book"), "epub");
        let handle = AcsDrmHandle::open(store.clone(), files.clone(), no_update()).unwrap();
        (store, files, handle)
    }

    fn renewed_loan() -> AdobeRightsUpdate {
        AdobeRightsUpdate {
            rights: b"<rights renewed/>".to_vec(),
            loan: AdobeLoan {
                loan_id: "loan-2".into(),
                returnable: false,
                expires: None,
            },
        }
    }

    #[test]
    fn failed_rights_write_never_pairs_with_new_loan() {
        let (store, files, handle) = memory_handle();
        handle
            .set_adobe_rights_information(Some(AdobeRightsUpdate {
                rights: b"<rights/>".to_vec(),
                loan: loan(),
            }))
            .unwrap();

        store.fail_writes_to(files.adobe_rights());
        assert!(handle.set_adobe_rights_information(Some(renewed_loan())).is_err());

        assert_eq!(handle.snapshot().rights, None);
        assert!(!store.exists(&files.adobe_rights()));
        let reopened = AcsDrmHandle::open(store.clone(), files, no_update()).unwrap();
        assert_eq!(reopened.snapshot(), handle.snapshot());
    }

    #[test]
    fn failed_loan_write_leaves_no_rights() {
        let (store, files, handle) = memory_handle();
        handle
            .set_adobe_rights_information(Some(AdobeRightsUpdate {
                rights: b"<rights/>".to_vec(),
                loan: loan(),
            }))
            .unwrap();

        store.fail_writes_to(files.adobe_loan());
        assert!(handle.set_adobe_rights_information(Some(renewed_loan())).is_err());

        assert_eq!(handle.snapshot().rights, None);
        let reopened = AcsDrmHandle::open(store.clone(), files.clone(), no_update()).unwrap();
        assert_eq!(reopened.snapshot(), handle.snapshot());

        store.clear_failures();
        handle.set_adobe_rights_information(Some(renewed_loan())).unwrap();
        let reopened = AcsDrmHandle::open(store.clone(), files, no_update()).unwrap();
        assert_eq!(reopened.snapshot().rights.as_ref().unwrap().loan.loan_id, "loan-2");
    }
}

//! AxisNow license state

use super::{DrmFiles, OnUpdate, present};
use crate::error::Result;
use crate::storage::FileStore;
use crate::utils::lock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Snapshot of AxisNow state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisInformation {
    /// The persisted fulfillment token
    pub token: Option<PathBuf>,
    /// The book license
    pub license: Option<PathBuf>,
    /// The user key that decrypts the license
    pub user_key: Option<PathBuf>,
}

/// Handle over the AxisNow artifacts of one format
pub struct AxisDrmHandle {
    store: Arc<dyn FileStore>,
    files: DrmFiles,
    state: Mutex<Arc<AxisInformation>>,
    on_update: OnUpdate,
}

impl fmt::Debug for AxisDrmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AxisDrmHandle")
            .field("files", &self.files)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl AxisDrmHandle {
    pub(crate) fn open(
        store: Arc<dyn FileStore>,
        files: DrmFiles,
        on_update: OnUpdate,
    ) -> Result<Self> {
        let info = AxisInformation {
            token: present(store.as_ref(), &files.axis_token()),
            license: present(store.as_ref(), &files.axis_license()),
            user_key: present(store.as_ref(), &files.axis_user_key()),
        };
        Ok(Self {
            store,
            files,
            state: Mutex::new(Arc::new(info)),
            on_update,
        })
    }

    /// Current state
    pub fn snapshot(&self) -> Arc<AxisInformation> {
        lock(&self.state).clone()
    }

    /// Persist the fulfillment token, or delete it with `None`
    pub fn set_token(&self, data: Option<&[u8]>) -> Result<()> {
        self.replace(&self.files.axis_token(), data, |info, path| info.token = path)
    }

    /// Persist the license, or delete it with `None`
    pub fn copy_in_license(&self, data: Option<&[u8]>) -> Result<()> {
        self.replace(&self.files.axis_license(), data, |info, path| {
            info.license = path
        })
    }

    /// Persist the user key, or delete it with `None`
    pub fn copy_in_user_key(&self, data: Option<&[u8]>) -> Result<()> {
        self.replace(&self.files.axis_user_key(), data, |info, path| {
            info.user_key = path
        })
    }

    fn replace(
        &self,
        path: &Path,
        data: Option<&[u8]>,
        apply: impl FnOnce(&mut AxisInformation, Option<PathBuf>),
    ) -> Result<()> {
        {
            let mut state = lock(&self.state);
            match data {
                Some(bytes) => self.store.write_atomic(path, bytes)?,
                None => self.store.delete(path)?,
            }
            let mut next = (**state).clone();
            apply(&mut next, data.map(|_| path.to_path_buf()));
            *state = Arc::new(next);
        }
        (self.on_update)();
        Ok(())
    }
}

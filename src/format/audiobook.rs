//! Audio book format handle

use super::serialization::{PLAYER_POSITION, PlayerPosition};
use super::{load_document, save_document};
use crate::drm::OnUpdate;
use crate::error::{Error, Result};
use crate::storage::{FileStore, read_text};
use crate::utils::lock;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use url::Url;

/// A persisted manifest and where it was fetched from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioBookManifest {
    /// The manifest file
    pub file: PathBuf,
    /// The URI the manifest was fetched from, used to refresh it
    pub uri: Url,
}

/// Snapshot of an audio book format
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AudioBookFormat {
    /// The manifest, once fulfilled
    pub manifest: Option<AudioBookManifest>,
    /// Last saved player position
    pub position: Option<PlayerPosition>,
}

/// Handle over the audio book files of one book
pub struct AudioBookHandle {
    store: Arc<dyn FileStore>,
    manifest_path: PathBuf,
    uri_path: PathBuf,
    position_path: PathBuf,
    state: Mutex<Arc<AudioBookFormat>>,
    on_update: OnUpdate,
}

impl fmt::Debug for AudioBookHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioBookHandle")
            .field("manifest_path", &self.manifest_path)
            .finish_non_exhaustive()
    }
}

impl AudioBookHandle {
    pub(crate) fn open(
        store: Arc<dyn FileStore>,
        directory: &Path,
        on_update: OnUpdate,
    ) -> Result<Arc<Self>> {
        let manifest_path = directory.join("audiobook-manifest.json");
        let uri_path = directory.join("audiobook-manifest-uri.txt");
        let position_path = directory.join("audiobook-position.json");

        let manifest = match (
            store.exists(&manifest_path),
            read_text(store.as_ref(), &uri_path)?,
        ) {
            (true, Some(uri)) => Some(AudioBookManifest {
                file: manifest_path.clone(),
                uri: Url::parse(&uri).map_err(|e| Error::InvalidUri(format!("{uri}: {e}")))?,
            }),
            (false, None) => None,
            (has_manifest, _) => {
                tracing::warn!(
                    manifest = %manifest_path.display(),
                    has_manifest,
                    "audio book manifest and URI out of step, ignoring"
                );
                None
            }
        };
        let position = load_document(store.as_ref(), &position_path, &PLAYER_POSITION)?;

        Ok(Arc::new(Self {
            store,
            manifest_path,
            uri_path,
            position_path,
            state: Mutex::new(Arc::new(AudioBookFormat { manifest, position })),
            on_update,
        }))
    }

    /// Current state
    pub fn snapshot(&self) -> Arc<AudioBookFormat> {
        lock(&self.state).clone()
    }

    /// Persist a fulfilled manifest and the URI it came from
    pub fn copy_in_manifest_and_uri(&self, manifest: &[u8], uri: &Url) -> Result<()> {
        self.update(|next| {
            self.store.write_atomic(&self.manifest_path, manifest)?;
            self.store.write_atomic(&self.uri_path, uri.as_str().as_bytes())?;
            next.manifest = Some(AudioBookManifest {
                file: self.manifest_path.clone(),
                uri: uri.clone(),
            });
            Ok(())
        })
    }

    /// Save the player position, or clear it
    pub fn save_player_position(&self, position: Option<PlayerPosition>) -> Result<()> {
        self.update(|next| {
            save_document(
                self.store.as_ref(),
                &self.position_path,
                &PLAYER_POSITION,
                position.as_ref(),
            )?;
            next.position = position;
            Ok(())
        })
    }

    /// Delete the manifest; the player position stays
    pub fn delete_book_data(&self) -> Result<()> {
        self.update(|next| {
            self.store.delete(&self.manifest_path)?;
            self.store.delete(&self.uri_path)?;
            next.manifest = None;
            Ok(())
        })
    }

    fn update(&self, mutate: impl FnOnce(&mut AudioBookFormat) -> Result<()>) -> Result<()> {
        {
            let mut state = lock(&self.state);
            let mut next = (**state).clone();
            mutate(&mut next)?;
            *state = Arc::new(next);
        }
        (self.on_update)();
        Ok(())
    }
}

//! Local content sources for the content-copy subtask

use super::http::ProgressFn;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use url::Url;

/// URI schemes served by a [`ContentResolver`]
pub const LOCAL_SCHEMES: [&str; 3] = ["content", "file", "simplified-bundled"];

const COPY_CHUNK: usize = 64 * 1024;

/// Copies local content (bundled assets, files, platform content URIs) to a file
#[async_trait]
pub trait ContentResolver: Send + Sync {
    /// Copy the content behind `uri` into `destination`
    ///
    /// Returns the number of bytes copied, or `None` if cancelled. A cancelled
    /// or failed copy leaves nothing at `destination`.
    async fn resolve_to_file(
        &self,
        uri: &Url,
        destination: &Path,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<Option<u64>>;
}

/// Resolves `file:` URIs directly and `simplified-bundled:` / `content:` URIs
/// against configured roots
#[derive(Clone, Debug, Default)]
pub struct BundledContentResolver {
    bundle_root: Option<PathBuf>,
    content_root: Option<PathBuf>,
}

impl BundledContentResolver {
    /// A resolver that only serves `file:` URIs
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `simplified-bundled:` URIs from `root`
    pub fn with_bundle_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.bundle_root = Some(root.into());
        self
    }

    /// Serve `content:` URIs from `root`
    pub fn with_content_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.content_root = Some(root.into());
        self
    }

    fn source_path(&self, uri: &Url) -> Result<PathBuf> {
        let under = |root: &Option<PathBuf>| -> Result<PathBuf> {
            let root = root.as_ref().ok_or_else(|| {
                Error::NotSupported(format!("no root configured for {} URIs", uri.scheme()))
            })?;
            let relative: PathBuf = uri
                .host_str()
                .into_iter()
                .chain(uri.path_segments().into_iter().flatten())
                .filter(|s| !s.is_empty() && *s != "." && *s != "..")
                .collect();
            if relative.as_os_str().is_empty() {
                return Err(Error::InvalidUri(uri.to_string()));
            }
            Ok(root.join(relative))
        };

        match uri.scheme() {
            "file" => uri
                .to_file_path()
                .map_err(|()| Error::InvalidUri(uri.to_string())),
            "simplified-bundled" => under(&self.bundle_root),
            "content" => under(&self.content_root),
            other => Err(Error::NotSupported(format!("unsupported content scheme: {other}"))),
        }
    }

    async fn copy(
        source: &Path,
        destination: &Path,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<Option<u64>> {
        let mut input = tokio::fs::File::open(source).await?;
        let expected = input.metadata().await.ok().map(|m| m.len());
        let mut output = tokio::fs::File::create(destination).await?;
        let mut buffer = vec![0u8; COPY_CHUNK];
        let mut copied = 0u64;
        progress(copied, expected);

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let read = input.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            output.write_all(&buffer[..read]).await?;
            copied += read as u64;
            progress(copied, expected);
        }
        output.flush().await?;
        output.sync_all().await?;
        Ok(Some(copied))
    }
}

#[async_trait]
impl ContentResolver for BundledContentResolver {
    async fn resolve_to_file(
        &self,
        uri: &Url,
        destination: &Path,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<Option<u64>> {
        let source = self.source_path(uri)?;
        tracing::debug!(uri = %uri, source = %source.display(), "copying local content");
        let copied = Self::copy(&source, destination, cancel, progress).await;
        if !matches!(copied, Ok(Some(_))) {
            super::http::remove_quietly(destination).await;
        }
        copied
    }
}

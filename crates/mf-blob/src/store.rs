//! The [`BlobStore`] trait and its filesystem implementation.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use mf_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::key::BlobKey;

/// Byte stream returned by [`BlobStore::get`].
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Metadata returned by a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMeta {
    pub size: u64,
    pub content_type: Option<String>,
}

/// Object storage holding job inputs and outputs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Metadata for `key`, or `None` when it does not exist.
    async fn probe(&self, key: &BlobKey) -> Result<Option<BlobMeta>>;

    /// Open `key` for reading. Missing keys are [`Error::NotFound`].
    async fn get(&self, key: &BlobKey) -> Result<BlobReader>;

    /// Store `data` under `key`, replacing any previous object.
    async fn put(&self, key: &BlobKey, data: Bytes, content_type: &str) -> Result<BlobMeta>;

    /// Store everything read from `reader` under `key` without buffering
    /// the whole object in memory.
    async fn put_stream(
        &self,
        key: &BlobKey,
        reader: BlobReader,
        content_type: &str,
    ) -> Result<BlobMeta>;
}

/// Sidecar record kept next to each stored object.
#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
}

/// A [`BlobStore`] laid out as `<root>/<owner>/<path>`.
///
/// Content types live in a parallel tree under `<root>/.meta`, which no valid
/// key can address. Writes go to a temporary file that is renamed into
/// place, so readers never observe a partial object.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

const META_DIR: &str = ".meta";

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of the object for `key`.
    pub fn object_path(&self, key: &BlobKey) -> PathBuf {
        let mut p = self.root.join(key.owner());
        p.extend(key.path().split('/'));
        p
    }

    fn meta_path(&self, key: &BlobKey) -> PathBuf {
        let mut p = self.root.join(META_DIR).join(key.owner());
        p.extend(key.path().split('/'));
        p.set_file_name(format!("{}.json", key.file_name()));
        p
    }

    async fn read_content_type(&self, key: &BlobKey) -> Option<String> {
        let raw = tokio::fs::read(self.meta_path(key)).await.ok()?;
        match serde_json::from_slice::<Sidecar>(&raw) {
            Ok(s) => Some(s.content_type),
            Err(e) => {
                tracing::warn!(key = %key, "Ignoring unreadable blob metadata: {e}");
                None
            }
        }
    }
}

/// Copy `reader` into `dest` via a temporary sibling that is renamed into
/// place. Returns the number of bytes written.
async fn write_atomic<R>(dest: &Path, mut reader: R) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    let result = async {
        let mut f = tokio::fs::File::create(&tmp).await?;
        let written = tokio::io::copy(&mut reader, &mut f).await?;
        f.flush().await?;
        f.sync_all().await?;
        drop(f);
        tokio::fs::rename(&tmp, dest).await?;
        Ok(written)
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

impl FsBlobStore {
    async fn write_sidecar(&self, key: &BlobKey, content_type: &str) -> Result<()> {
        let sidecar = serde_json::to_vec(&Sidecar {
            content_type: content_type.to_string(),
        })
        .map_err(|e| Error::Internal(format!("blob metadata encode: {e}")))?;
        write_atomic(&self.meta_path(key), sidecar.as_slice()).await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn probe(&self, key: &BlobKey) -> Result<Option<BlobMeta>> {
        match tokio::fs::metadata(self.object_path(key)).await {
            Ok(md) if md.is_file() => Ok(Some(BlobMeta {
                size: md.len(),
                content_type: self.read_content_type(key).await,
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &BlobKey) -> Result<BlobReader> {
        match tokio::fs::File::open(self.object_path(key)).await {
            Ok(f) => Ok(Box::pin(f)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::not_found("blob", key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &BlobKey, data: Bytes, content_type: &str) -> Result<BlobMeta> {
        self.put_stream(key, Box::pin(std::io::Cursor::new(data)), content_type)
            .await
    }

    async fn put_stream(
        &self,
        key: &BlobKey,
        reader: BlobReader,
        content_type: &str,
    ) -> Result<BlobMeta> {
        let size = write_atomic(&self.object_path(key), reader).await?;
        self.write_sidecar(key, content_type).await?;

        tracing::debug!(key = %key, size, content_type, "Stored blob");
        Ok(BlobMeta {
            size,
            content_type: Some(content_type.to_string()),
        })
    }
}

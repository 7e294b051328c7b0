//! Content-addressed blob storage on the local filesystem.
//!
//! A blob's id is the BLAKE3 hex digest of its bytes. Blobs live under
//! `<root>/<first two hex chars>/<rest>` and are written through a temp file
//! followed by a rename, so readers never observe a partial blob.

use async_trait::async_trait;
use lumin_common::BlobId;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use super::{BlobStore, StoreError};

#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Id the store would assign to `bytes`.
    pub fn blob_id(bytes: &[u8]) -> BlobId {
        BlobId::new(blake3::hash(bytes).to_hex().to_string())
    }

    /// On-disk location of a blob. `None` for ids that are not a hex digest.
    pub fn path_for(&self, id: &BlobId) -> Option<PathBuf> {
        let id = id.as_str();
        if id.len() < 3 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let (shard, rest) = id.split_at(2);
        Some(self.root.join(shard).join(rest))
    }

    pub async fn read(&self, id: &BlobId) -> Result<Vec<u8>, StoreError> {
        let path = self
            .path_for(id)
            .ok_or_else(|| StoreError::Rejected(format!("invalid blob id '{id}'")))?;
        Ok(tokio::fs::read(path).await?)
    }

    pub async fn contains(&self, id: &BlobId) -> bool {
        match self.path_for(id) {
            Some(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            None => false,
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn save(&self, bytes: Vec<u8>) -> Result<BlobId, StoreError> {
        let id = Self::blob_id(&bytes);
        let path = self
            .path_for(&id)
            .ok_or_else(|| StoreError::Rejected(format!("invalid blob id '{id}'")))?;

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            trace!(blob = %id, "blob already stored");
            return Ok(id);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp{}-{seq}", std::process::id()));
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        trace!(blob = %id, size = bytes.len(), "blob stored");
        Ok(id)
    }
}

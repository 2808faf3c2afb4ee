//! Blob storage holding the files attached to publications.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{PublishError, PublishResult};

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the content of a blob.
    async fn fetch(&self, blob_id: &str) -> PublishResult<Vec<u8>>;
}

/// Blobs stored as plain files below a root directory.
#[derive(Debug, Clone)]
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, blob_id: &str) -> PublishResult<PathBuf> {
        let relative = Path::new(blob_id);
        if blob_id.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(PublishError::Store(format!("invalid blob id {:?}", blob_id)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn fetch(&self, blob_id: &str) -> PublishResult<Vec<u8>> {
        let path = self.blob_path(blob_id)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PublishError::Store(
                format!("blob {} not found in {}", blob_id, self.root.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, blob_id: impl Into<String>, content: impl Into<Vec<u8>>) {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(blob_id.into(), content.into());
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn fetch(&self, blob_id: &str) -> PublishResult<Vec<u8>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| PublishError::Store("blob store lock poisoned".to_string()))?;
        blobs
            .get(blob_id)
            .cloned()
            .ok_or_else(|| PublishError::Store(format!("blob {} not found", blob_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_filesystem_fetch() {
        let td = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(td.path().join("ab")).unwrap();
        std::fs::write(td.path().join("ab/blob"), b"data").unwrap();
        let store = FilesystemBlobStore::new(td.path());
        assert_eq!(store.fetch("ab/blob").await.unwrap(), b"data");
        assert!(store.fetch("missing").await.is_err());
        assert!(store.fetch("../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_fetch() {
        let store = MemoryBlobStore::new();
        store.insert("x", b"y".to_vec());
        assert_eq!(store.fetch("x").await.unwrap(), b"y");
        assert!(store.fetch("z").await.is_err());
    }
}

//! In-memory filestore for tests. Nothing persists across restarts.

use async_trait::async_trait;
use exn::OptionExt;
use std::collections::HashMap;
use std::path::Path;
use stowage_keys::FileKey;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

use crate::backend::{ByteStream, FileStore};
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;

/// Payloads in a `HashMap` behind a [`RwLock`], so all trait methods can
/// operate on `&self` without external synchronisation.
#[derive(Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<FileKey, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with `(key, payload)` pairs.
    pub fn with_files(files: impl IntoIterator<Item = (FileKey, Vec<u8>)>) -> Self {
        Self { files: RwLock::new(files.into_iter().collect()) }
    }

    async fn insert(&self, key: &FileKey, bytes: Vec<u8>) -> Result<()> {
        let mut files = self.files.write().await;
        if files.contains_key(key) {
            exn::bail!(ErrorKind::AlreadyExists(key.clone()))
        }
        files.insert(key.clone(), bytes);
        Ok(())
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn put_file(&self, path: &Path, key: &FileKey) -> Result<()> {
        let bytes = tokio::fs::read(path).await.map_err(ErrorKind::Io)?;
        self.insert(key, bytes).await
    }

    async fn put_file_object(&self, mut reader: ByteStream, key: &FileKey) -> Result<()> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await.map_err(ErrorKind::Io)?;
        self.insert(key, bytes).await
    }

    async fn put_file_bytes(&self, bytes: Vec<u8>, key: &FileKey) -> Result<()> {
        self.insert(key, bytes).await
    }

    async fn get_file_object(&self, key: &FileKey) -> Result<ByteStream> {
        let bytes = self.get_file_bytes(key).await?;
        Ok(Box::pin(std::io::Cursor::new(bytes)))
    }

    async fn get_file_bytes(&self, key: &FileKey) -> Result<Vec<u8>> {
        let files = self.files.read().await;
        let bytes = files.get(key).ok_or_raise(|| ErrorKind::NotFound(key.clone()))?;
        Ok(bytes.clone())
    }

    async fn stat(&self, key: &FileKey) -> Result<FileInfo> {
        let files = self.files.read().await;
        let bytes = files.get(key).ok_or_raise(|| ErrorKind::NotFound(key.clone()))?;
        Ok(FileInfo { size: bytes.len() as u64 })
    }

    async fn exists(&self, key: &FileKey) -> Result<bool> {
        Ok(self.files.read().await.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::assert_store_contract;
    use stowage_keys::KeyFormat;

    #[tokio::test]
    async fn test_contract() {
        assert_store_contract(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_with_files() {
        let key = KeyFormat::Sha256e.from_bytes(b"seed", None);
        let store = MemoryStore::with_files([(key.clone(), b"seed".to_vec())]);
        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.get_file_bytes(&key).await.unwrap(), b"seed");
    }
}

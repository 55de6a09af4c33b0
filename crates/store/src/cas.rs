//! Content-addressed storage wrapper: a filestore plus a key format.
//!
//! The `put_*` variants accept an optional explicit key and compute one from
//! the bytes when omitted. An optional batch counter flushes the underlying
//! store every `batch_size` writes; batching trades atomicity for
//! throughput, but the store stays consistent whatever happens mid-batch.

use std::path::Path;
use stowage_keys::{FileKey, KeyFormat};
use tokio::io::AsyncReadExt;

use crate::backend::ByteStream;
use crate::error::{ErrorKind, Result};
use crate::StoreHandle;

pub struct Cas {
    store: StoreHandle,
    key_format: KeyFormat,
    batch_size: Option<usize>,
    pending: usize,
}

impl Cas {
    pub fn new(store: StoreHandle, key_format: KeyFormat) -> Self {
        Self { store, key_format, batch_size: None, pending: 0 }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn key_format(&self) -> KeyFormat {
        self.key_format
    }

    /// Record one write in the current batch, flushing when it fills.
    async fn tick(&mut self) -> Result<()> {
        if let Some(batch_size) = self.batch_size {
            self.pending += 1;
            if self.pending >= batch_size {
                self.store.flush().await?;
                self.pending = 0;
            }
        }
        Ok(())
    }

    /// Start batching: the store is flushed every `batch_size` writes
    /// instead of relying on the backend's own write-through behavior.
    pub fn begin_batch(&mut self, batch_size: usize) {
        self.batch_size = Some(batch_size);
    }

    /// Stop batching and flush whatever is pending.
    pub async fn end_batch(&mut self) -> Result<()> {
        self.store.flush().await?;
        self.pending = 0;
        self.batch_size = None;
        Ok(())
    }

    /// Store an on-disk file. Local backends may move it. The key is
    /// computed from the file when not supplied.
    pub async fn put_file(&mut self, path: &Path, key: Option<FileKey>) -> Result<FileKey> {
        let key = match key {
            Some(key) => key,
            None => self.key_format.from_file(path, None).await.map_err(ErrorKind::key)?,
        };
        self.store.put_file(path, &key).await?;
        self.tick().await?;
        Ok(key)
    }

    /// Store a copy of an on-disk file, leaving the original in place.
    pub async fn copy_file(&mut self, path: &Path, key: Option<FileKey>) -> Result<FileKey> {
        let key = match key {
            Some(key) => key,
            None => self.key_format.from_file(path, None).await.map_err(ErrorKind::key)?,
        };
        let file = tokio::fs::File::open(path).await.map_err(ErrorKind::Io)?;
        self.store.put_file_object(Box::pin(file), &key).await?;
        self.tick().await?;
        Ok(key)
    }

    /// Store an in-memory payload.
    pub async fn put_file_bytes(&mut self, bytes: Vec<u8>, key: Option<FileKey>) -> Result<FileKey> {
        let key = match key {
            Some(key) => key,
            None => self.key_format.from_bytes(&bytes, None),
        };
        self.store.put_file_bytes(bytes, &key).await?;
        self.tick().await?;
        Ok(key)
    }

    /// Store a byte stream. Without an explicit key the stream has to be
    /// buffered once to compute it.
    pub async fn put_file_object(
        &mut self,
        mut reader: ByteStream,
        key: Option<FileKey>,
    ) -> Result<FileKey> {
        match key {
            Some(key) => {
                self.store.put_file_object(reader, &key).await?;
                self.tick().await?;
                Ok(key)
            }
            None => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes).await.map_err(ErrorKind::Io)?;
                self.put_file_bytes(bytes, None).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FileStore, MemoryStore};
    use std::sync::Arc;

    fn cas() -> (Arc<MemoryStore>, Cas) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), Cas::new(store, KeyFormat::Sha256e))
    }

    #[tokio::test]
    async fn test_computes_key_when_omitted() {
        let (store, mut cas) = cas();
        let key = cas.put_file_bytes(b"hello".to_vec(), None).await.unwrap();
        assert_eq!(
            key.as_str(),
            "SHA256E-s5--2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_explicit_key_is_used_verbatim() {
        let (store, mut cas) = cas();
        let declared = KeyFormat::Sha256e.from_bytes(b"hello", Some("txt"));
        let key = cas.put_file_bytes(b"hello".to_vec(), Some(declared.clone())).await.unwrap();
        assert_eq!(key, declared);
        assert!(store.exists(&declared).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_file_derives_extension_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("greeting.TXT");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let (_, mut cas) = cas();
        let key = cas.copy_file(&path, None).await.unwrap();
        assert_eq!(key.extension(), Some("txt"));
        // copy_file leaves the source alone.
        assert!(tokio::fs::try_exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_streamed_put_matches_bytes_put() {
        let (_, mut cas) = cas();
        let streamed = cas
            .put_file_object(Box::pin(std::io::Cursor::new(b"payload".to_vec())), None)
            .await
            .unwrap();
        assert_eq!(streamed, KeyFormat::Sha256e.from_bytes(b"payload", None));
    }
}

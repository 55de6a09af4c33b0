//! Ordered overlay of child filestores.
//!
//! Writes go to the first child. Reads try each child in order, consulting
//! the cheap [`possibly_exists`](crate::FileStore::possibly_exists) check
//! before paying for an authoritative lookup.

use async_trait::async_trait;
use std::path::Path;
use stowage_keys::FileKey;

use crate::backend::{ByteStream, FileStore};
use crate::error::{ErrorKind, Result};
use crate::file::{FileInfo, Presence};
use crate::StoreHandle;

pub struct UnionStore {
    children: Vec<StoreHandle>,
}

impl UnionStore {
    /// `children` must be non-empty; the first child receives all writes.
    pub fn new(children: Vec<StoreHandle>) -> Self {
        assert!(!children.is_empty(), "UnionStore requires at least one child");
        Self { children }
    }

    fn primary(&self) -> &StoreHandle {
        &self.children[0]
    }
}

#[async_trait]
impl FileStore for UnionStore {
    async fn put_file(&self, path: &Path, key: &FileKey) -> Result<()> {
        self.primary().put_file(path, key).await
    }

    async fn put_file_object(&self, reader: ByteStream, key: &FileKey) -> Result<()> {
        self.primary().put_file_object(reader, key).await
    }

    async fn put_file_bytes(&self, bytes: Vec<u8>, key: &FileKey) -> Result<()> {
        self.primary().put_file_bytes(bytes, key).await
    }

    async fn get_file_object(&self, key: &FileKey) -> Result<ByteStream> {
        for child in &self.children {
            match child.get_file_object(key).await {
                Ok(reader) => return Ok(reader),
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        exn::bail!(ErrorKind::NotFound(key.clone()))
    }

    async fn stat(&self, key: &FileKey) -> Result<FileInfo> {
        for child in &self.children {
            match child.stat(key).await {
                Ok(info) => return Ok(info),
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        exn::bail!(ErrorKind::NotFound(key.clone()))
    }

    async fn exists(&self, key: &FileKey) -> Result<bool> {
        for child in &self.children {
            match child.possibly_exists(key).await? {
                Presence::Yes => return Ok(true),
                Presence::Maybe => {
                    if child.exists(key).await? {
                        return Ok(true);
                    }
                }
                Presence::No => continue,
            }
        }
        Ok(false)
    }

    async fn possibly_exists(&self, key: &FileKey) -> Result<Presence> {
        for child in &self.children {
            match child.possibly_exists(key).await? {
                Presence::Yes => return Ok(Presence::Yes),
                Presence::Maybe => return Ok(Presence::Maybe),
                Presence::No => continue,
            }
        }
        Ok(Presence::No)
    }

    async fn flush(&self) -> Result<()> {
        for child in &self.children {
            child.flush().await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        for child in &self.children {
            child.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::assert_store_contract;
    use crate::backend::MemoryStore;
    use std::sync::Arc;
    use stowage_keys::KeyFormat;

    fn two_layer() -> (Arc<MemoryStore>, Arc<MemoryStore>, UnionStore) {
        let top = Arc::new(MemoryStore::new());
        let bottom = Arc::new(MemoryStore::new());
        let union = UnionStore::new(vec![top.clone() as StoreHandle, bottom.clone() as StoreHandle]);
        (top, bottom, union)
    }

    #[tokio::test]
    async fn test_contract() {
        let (_, _, union) = two_layer();
        assert_store_contract(&union).await;
    }

    #[tokio::test]
    async fn test_writes_go_to_first_child_only() {
        let (top, bottom, union) = two_layer();
        let key = KeyFormat::Sha256e.from_bytes(b"hello", None);
        union.put_file_bytes(b"hello".to_vec(), &key).await.unwrap();
        assert!(top.exists(&key).await.unwrap());
        assert!(!bottom.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_reads_fall_through_to_later_children() {
        let (top, bottom, union) = two_layer();
        let key = KeyFormat::Sha256e.from_bytes(b"below", None);
        bottom.put_file_bytes(b"below".to_vec(), &key).await.unwrap();

        assert!(!top.exists(&key).await.unwrap());
        assert!(union.exists(&key).await.unwrap());
        assert_eq!(union.get_file_bytes(&key).await.unwrap(), b"below");
        assert_eq!(union.stat(&key).await.unwrap().size, 5);
    }

    #[tokio::test]
    async fn test_first_child_shadows_later_ones() {
        let (top, bottom, union) = two_layer();
        // Two different payloads under the same key can only happen if the
        // children were populated out-of-band; the union must prefer child 0.
        let key = KeyFormat::Sha256e.from_bytes(b"hello", None);
        top.put_file_bytes(b"hello".to_vec(), &key).await.unwrap();
        bottom.put_file_bytes(b"other".to_vec(), &key).await.unwrap();
        assert_eq!(union.get_file_bytes(&key).await.unwrap(), b"hello");
    }
}

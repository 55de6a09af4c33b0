//! Embedded ordered key-value backend.
//!
//! Every payload is a value in a single redb table, keyed by the file-key
//! bytes. Suited to datasets of many small payloads where one file per
//! payload would waste inodes.

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;
use stowage_keys::FileKey;
use tokio::io::AsyncReadExt;

use crate::backend::{ByteStream, FileStore};
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;

const FILES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("files");

fn backend_err(err: impl Display) -> ErrorKind {
    ErrorKind::Backend(err.to_string())
}

pub struct KvStore {
    db: Arc<Database>,
}

impl KvStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).map_err(backend_err)?;
        // Create the table up front so reads on a fresh database succeed.
        let txn = db.begin_write().map_err(backend_err)?;
        txn.open_table(FILES).map_err(backend_err)?;
        txn.commit().map_err(backend_err)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Database transactions are blocking; run them off the async threads.
    async fn read_value(&self, key: &FileKey) -> Result<Option<Vec<u8>>> {
        let db = self.db.clone();
        let key_bytes = key.as_bytes().to_vec();
        tokio::task::spawn_blocking(move || -> std::result::Result<_, redb::Error> {
            let txn = db.begin_read()?;
            let table = txn.open_table(FILES)?;
            Ok(table.get(key_bytes.as_slice())?.map(|guard| guard.value().to_vec()))
        })
        .await
        .map_err(backend_err)?
        .map_err(backend_err)
        .map_err(Into::into)
    }

    async fn insert(&self, key: &FileKey, bytes: Vec<u8>) -> Result<()> {
        let db = self.db.clone();
        let key_bytes = key.as_bytes().to_vec();
        let inserted = tokio::task::spawn_blocking(move || -> std::result::Result<bool, redb::Error> {
            let txn = db.begin_write()?;
            let inserted = {
                let mut table = txn.open_table(FILES)?;
                if table.get(key_bytes.as_slice())?.is_some() {
                    false
                } else {
                    table.insert(key_bytes.as_slice(), bytes.as_slice())?;
                    true
                }
            };
            txn.commit()?;
            Ok(inserted)
        })
        .await
        .map_err(backend_err)?
        .map_err(backend_err)?;

        if !inserted {
            exn::bail!(ErrorKind::AlreadyExists(key.clone()))
        }
        Ok(())
    }
}

#[async_trait]
impl FileStore for KvStore {
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
        match self.read_value(key).await? {
            Some(bytes) => Ok(bytes),
            None => exn::bail!(ErrorKind::NotFound(key.clone())),
        }
    }

    async fn stat(&self, key: &FileKey) -> Result<FileInfo> {
        match self.read_value(key).await? {
            Some(bytes) => Ok(FileInfo { size: bytes.len() as u64 }),
            None => exn::bail!(ErrorKind::NotFound(key.clone())),
        }
    }

    async fn exists(&self, key: &FileKey) -> Result<bool> {
        Ok(self.read_value(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::assert_store_contract;
    use stowage_keys::KeyFormat;

    #[tokio::test]
    async fn test_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open(dir.path().join("store.redb")).unwrap();
        assert_store_contract(&store).await;
    }

    #[tokio::test]
    async fn test_payloads_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.redb");
        let key = KeyFormat::Sha256e.from_bytes(b"persistent", None);
        {
            let store = KvStore::open(&path).unwrap();
            store.put_file_bytes(b"persistent".to_vec(), &key).await.unwrap();
            store.close().await.unwrap();
        }
        let store = KvStore::open(&path).unwrap();
        assert_eq!(store.get_file_bytes(&key).await.unwrap(), b"persistent");
    }
}

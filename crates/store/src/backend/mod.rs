//! The `FileStore` trait and its implementations.
//!
//! A filestore is a mapping from file keys to immutable byte payloads. The
//! trait gives every backend the same contract: a `put_*` fails if the key
//! is present, a `get_*` fails if it is absent, and nothing ever mutates the
//! bytes under an existing key.

mod annex;
mod archive;
mod kv;
mod measure;
mod memory;
mod union;

pub use self::annex::AnnexStore;
pub use self::archive::ArchiveStore;
pub use self::kv::KvStore;
pub use self::measure::MeasureStore;
pub use self::memory::MemoryStore;
pub use self::union::UnionStore;

use crate::error::{ErrorKind, Result};
use crate::file::{FileInfo, Presence};
use async_trait::async_trait;
use std::path::Path;
use std::pin::Pin;
use stowage_keys::FileKey;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A readable payload stream.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Uniform interface for content-addressed byte stores.
///
/// # Contract
/// - Keys are immutable: a successful `put_*` is the only write a key ever
///   sees. Every `put_*` fails with
///   [`AlreadyExists`](crate::error::ErrorKind::AlreadyExists) when the key
///   is present.
/// - `get_*` and [`stat`](Self::stat) fail with
///   [`NotFound`](crate::error::ErrorKind::NotFound) when it is absent.
/// - [`flush`](Self::flush) commits buffered writes and is idempotent.
/// - [`close`](Self::close) flushes and releases connections/descriptors;
///   owners call it on every exit path.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Make `key` resolve to the bytes currently at `path`.
    ///
    /// Local backends may *move* the file; remote backends copy it. The
    /// default implementation copies and leaves the source in place.
    async fn put_file(&self, path: &Path, key: &FileKey) -> Result<()> {
        let file = tokio::fs::File::open(path).await.map_err(ErrorKind::Io)?;
        self.put_file_object(Box::pin(file), key).await
    }

    /// Store the contents of a byte stream under `key`.
    async fn put_file_object(&self, reader: ByteStream, key: &FileKey) -> Result<()>;

    /// Store an in-memory buffer under `key`.
    async fn put_file_bytes(&self, bytes: Vec<u8>, key: &FileKey) -> Result<()> {
        self.put_file_object(Box::pin(std::io::Cursor::new(bytes)), key).await
    }

    /// Open a readable stream for the payload under `key`.
    async fn get_file_object(&self, key: &FileKey) -> Result<ByteStream>;

    /// Read the whole payload under `key` into memory.
    async fn get_file_bytes(&self, key: &FileKey) -> Result<Vec<u8>> {
        let mut reader = self.get_file_object(key).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.map_err(ErrorKind::Io)?;
        Ok(buf)
    }

    /// Payload metadata without reading the bytes.
    async fn stat(&self, key: &FileKey) -> Result<FileInfo>;

    /// Authoritative existence check.
    async fn exists(&self, key: &FileKey) -> Result<bool>;

    /// Cheap, possibly-inexact existence check.
    ///
    /// Backends with a summary structure (bloom filter, index) can answer
    /// `No` in O(1) without touching storage. `Yes` and `No` must be exact;
    /// `Maybe` must be confirmed with [`exists`](Self::exists).
    async fn possibly_exists(&self, key: &FileKey) -> Result<Presence> {
        Ok(if self.exists(key).await? { Presence::Yes } else { Presence::No })
    }

    /// Commit buffered writes. Idempotent.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Flush and release resources. After `close`, the store must not be
    /// used.
    async fn close(&self) -> Result<()> {
        self.flush().await
    }
}

/// Stream one key's payload from `src` into `dst`.
pub async fn filestore_copy(
    src: &dyn FileStore,
    dst: &dyn FileStore,
    key: &FileKey,
) -> Result<()> {
    let reader = src.get_file_object(key).await?;
    dst.put_file_object(reader, key).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_keys::KeyFormat;

    /// Contract assertions every local backend must satisfy; exercised from
    /// each backend's own test module.
    pub(crate) async fn assert_store_contract(store: &dyn FileStore) {
        let format = KeyFormat::Sha256e;
        let key = format.from_bytes(b"hello", Some("txt"));
        let missing = format.from_bytes(b"absent", Some("txt"));

        assert!(!store.exists(&key).await.unwrap());
        assert_eq!(store.possibly_exists(&missing).await.unwrap(), Presence::No);
        let err = store.get_file_bytes(&key).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));

        store.put_file_bytes(b"hello".to_vec(), &key).await.unwrap();
        assert!(store.exists(&key).await.unwrap());
        assert_ne!(store.possibly_exists(&key).await.unwrap(), Presence::No);
        assert_eq!(store.stat(&key).await.unwrap().size, 5);
        assert_eq!(store.get_file_bytes(&key).await.unwrap(), b"hello");

        // Re-putting an existing key is refused, even with identical bytes.
        let err = store.put_file_bytes(b"hello".to_vec(), &key).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        let err = store.put_file_bytes(b"other".to_vec(), &key).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        assert_eq!(store.get_file_bytes(&key).await.unwrap(), b"hello");

        store.flush().await.unwrap();
        store.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_filestore_copy_streams_between_backends() {
        let src = MemoryStore::new();
        let dst = MemoryStore::new();
        let key = KeyFormat::Sha256e.from_bytes(b"payload", None);
        src.put_file_bytes(b"payload".to_vec(), &key).await.unwrap();

        filestore_copy(&src, &dst, &key).await.unwrap();
        assert_eq!(dst.get_file_bytes(&key).await.unwrap(), b"payload");

        // Destination now refuses the key.
        let err = filestore_copy(&src, &dst, &key).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
    }
}

//! Filesystem backend sharded by the locator hash.
//!
//! Every payload is a separate file under
//! `<root>/<md5(key)[0:3]>/<md5(key)[3:6]>/<key>`. The file key
//! `SHA256E-s5--2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824.txt`
//! has a locator hash beginning `091de9`, so its payload lands at
//! `<root>/091/de9/` .
//!
//! Reads also consult the deprecated `…/<key>/<key>` layout used by older
//! trees.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use stowage_keys::FileKey;
use tracing::debug;

use crate::backend::{ByteStream, FileStore};
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use crate::locator;

pub struct AnnexStore {
    root: PathBuf,
}

impl AnnexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a key in the current layout.
    pub fn key_path(&self, key: &FileKey) -> PathBuf {
        self.root.join(locator::key_path(key))
    }

    /// Absolute path for a key in the deprecated layout. Read fallback only.
    pub fn legacy_key_path(&self, key: &FileKey) -> PathBuf {
        self.root.join(locator::legacy_key_path(key))
    }

    /// Find the on-disk path holding `key`, trying the current layout first
    /// and then the deprecated one.
    async fn resolve(&self, key: &FileKey) -> Result<PathBuf> {
        let path = self.key_path(key);
        if tokio::fs::try_exists(&path).await.map_err(ErrorKind::Io)? {
            return Ok(path);
        }
        let legacy = self.legacy_key_path(key);
        if tokio::fs::try_exists(&legacy).await.map_err(ErrorKind::Io)? {
            debug!(key = %key, "found payload at deprecated path");
            return Ok(legacy);
        }
        exn::bail!(ErrorKind::NotFound(key.clone()))
    }

    /// Destination path for a new key, with its parent directory created.
    /// Fails if the key is already present.
    async fn prepare_destination(&self, key: &FileKey) -> Result<PathBuf> {
        let path = self.key_path(key);
        if tokio::fs::try_exists(&path).await.map_err(ErrorKind::Io)? {
            exn::bail!(ErrorKind::AlreadyExists(key.clone()))
        }
        let parent = path
            .parent()
            .ok_or_else(|| ErrorKind::InvalidPath(path.clone()))?;
        tokio::fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
        Ok(path)
    }
}

#[async_trait]
impl FileStore for AnnexStore {
    /// Move an on-disk file into the annex. Falls back to copy-and-remove
    /// when the source is on a different filesystem.
    async fn put_file(&self, path: &Path, key: &FileKey) -> Result<()> {
        let destination = self.prepare_destination(key).await?;
        match tokio::fs::rename(path, &destination).await {
            Ok(()) => Ok(()),
            // EXDEV: rename across mount points is not possible.
            Err(err) if err.raw_os_error() == Some(18) => {
                tokio::fs::copy(path, &destination).await.map_err(ErrorKind::Io)?;
                tokio::fs::remove_file(path).await.map_err(ErrorKind::Io)?;
                Ok(())
            }
            Err(err) => Err(ErrorKind::Io(err).into()),
        }
    }

    async fn put_file_object(&self, mut reader: ByteStream, key: &FileKey) -> Result<()> {
        let destination = self.prepare_destination(key).await?;
        let parent = destination
            .parent()
            .ok_or_else(|| ErrorKind::InvalidPath(destination.clone()))?;
        // Stage next to the destination so the final rename is atomic; a
        // killed process leaves only an unreferenced temp file behind.
        let staging = tempfile::NamedTempFile::new_in(parent).map_err(ErrorKind::Io)?;
        let mut out = tokio::fs::File::create(staging.path()).await.map_err(ErrorKind::Io)?;
        tokio::io::copy(&mut reader, &mut out).await.map_err(ErrorKind::Io)?;
        out.sync_all().await.map_err(ErrorKind::Io)?;
        drop(out);
        staging
            .persist(&destination)
            .map_err(|err| ErrorKind::Io(err.error))?;
        Ok(())
    }

    async fn get_file_object(&self, key: &FileKey) -> Result<ByteStream> {
        let path = self.resolve(key).await?;
        let file = tokio::fs::File::open(path).await.map_err(ErrorKind::Io)?;
        Ok(Box::pin(file))
    }

    async fn stat(&self, key: &FileKey) -> Result<FileInfo> {
        let path = self.resolve(key).await?;
        let meta = tokio::fs::metadata(path).await.map_err(ErrorKind::Io)?;
        Ok(FileInfo { size: meta.len() })
    }

    async fn exists(&self, key: &FileKey) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.key_path(key)).await.map_err(ErrorKind::Io)?)
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
        let store = AnnexStore::new(dir.path());
        assert_store_contract(&store).await;
    }

    #[tokio::test]
    async fn test_payload_lands_at_locator_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnnexStore::new(dir.path());
        let key = KeyFormat::Sha256e.from_bytes(b"hello", Some("txt"));
        store.put_file_bytes(b"hello".to_vec(), &key).await.unwrap();

        let expected = dir.path().join("091").join("de9").join(key.as_str());
        assert_eq!(tokio::fs::read(expected).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_put_file_moves_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnnexStore::new(dir.path().join("annex"));
        let source = dir.path().join("incoming.txt");
        tokio::fs::write(&source, b"hello").await.unwrap();

        let key = KeyFormat::Sha256e.from_bytes(b"hello", Some("txt"));
        store.put_file(&source, &key).await.unwrap();
        assert!(!tokio::fs::try_exists(&source).await.unwrap());
        assert_eq!(store.get_file_bytes(&key).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_deprecated_layout_read_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnnexStore::new(dir.path());
        let key = KeyFormat::Sha256e.from_bytes(b"hello", Some("txt"));

        let legacy = store.legacy_key_path(&key);
        tokio::fs::create_dir_all(legacy.parent().unwrap()).await.unwrap();
        tokio::fs::write(&legacy, b"hello").await.unwrap();

        // Not visible to `exists` (current layout only), but readable.
        assert!(!store.exists(&key).await.unwrap());
        assert_eq!(store.get_file_bytes(&key).await.unwrap(), b"hello");
        assert_eq!(store.stat(&key).await.unwrap().size, 5);
    }
}

//! A filestore backed by an SFTP peer.
//!
//! Remote paths use the same locator-hash layout as the directory backend,
//! so this store works equally against the stowage SFTP server (which
//! ignores the path prefix and re-verifies every upload) and a plain SFTP
//! server pointed at an annex root. Reads fall back to the deprecated
//! `…/<key>/<key>` layout like the local backend does.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use stowage_keys::FileKey;
use stowage_store::error::{ErrorKind as StoreErrorKind, Result as StoreResult};
use stowage_store::{ByteStream, FileInfo, FileStore, locator};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;

use crate::client::SftpClient;
use crate::error::ErrorKind;
use crate::proto;

/// Bytes per READ/WRITE request.
const CHUNK_SIZE: u32 = 32 * 1024;

pub struct SftpStore {
    client: Arc<Mutex<SftpClient>>,
    /// Path prefix on the remote, for servers that serve more than the
    /// annex root.
    root: Option<String>,
}

impl SftpStore {
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        key_file: &Path,
        root: Option<String>,
    ) -> crate::error::Result<Self> {
        let client = SftpClient::connect(host, port, user, key_file, None).await?;
        Ok(Self { client: Arc::new(Mutex::new(client)), root })
    }

    fn prefixed(&self, relative: String) -> String {
        match &self.root {
            Some(root) => format!("{}/{relative}", root.trim_end_matches('/')),
            None => relative,
        }
    }

    /// Remote path for a key, POSIX separators regardless of platform.
    fn remote_path(&self, key: &FileKey) -> String {
        self.prefixed(posix(&locator::key_path(key)))
    }

    fn legacy_remote_path(&self, key: &FileKey) -> String {
        self.prefixed(posix(&locator::legacy_key_path(key)))
    }

    fn to_store_error(key: &FileKey, err: crate::error::Error) -> stowage_store::error::Error {
        let kind = match &*err {
            ErrorKind::Remote { code, .. } if *code == proto::SSH_FX_NO_SUCH_FILE => {
                StoreErrorKind::NotFound(key.clone())
            }
            ErrorKind::Remote { message, .. } if message.contains("already exists") => {
                StoreErrorKind::AlreadyExists(key.clone())
            }
            _ => StoreErrorKind::Backend(err.to_string()),
        };
        err.raise(kind)
    }

    /// Open a read handle, falling back to the deprecated layout.
    async fn open_either_path(&self, key: &FileKey) -> StoreResult<Vec<u8>> {
        let mut client = self.client.lock().await;
        match client.open_read(&self.remote_path(key)).await {
            Ok(handle) => Ok(handle),
            Err(err) if is_no_such_file(&err) => client
                .open_read(&self.legacy_remote_path(key))
                .await
                .map_err(|err| Self::to_store_error(key, err)),
            Err(err) => Err(Self::to_store_error(key, err)),
        }
    }
}

fn posix(path: &Path) -> String {
    path.iter()
        .map(|component| component.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_no_such_file(err: &crate::error::Error) -> bool {
    matches!(&**err, ErrorKind::Remote { code, .. } if *code == proto::SSH_FX_NO_SUCH_FILE)
}

#[async_trait]
impl FileStore for SftpStore {
    async fn put_file_object(&self, mut reader: ByteStream, key: &FileKey) -> StoreResult<()> {
        let path = self.remote_path(key);
        let mut client = self.client.lock().await;

        // Plain SFTP servers need the fan-out directories; ours no-ops these.
        if let Some((prefix, _)) = path.rsplit_once('/') {
            if let Some((grandparent, _)) = prefix.rsplit_once('/') {
                let _ = client.mkdir(grandparent).await;
            }
            let _ = client.mkdir(prefix).await;
        }

        let handle = client
            .open_create(&path)
            .await
            .map_err(|err| Self::to_store_error(key, err))?;
        let mut offset = 0u64;
        let mut buf = vec![0u8; CHUNK_SIZE as usize];
        loop {
            let read = reader.read(&mut buf).await.map_err(StoreErrorKind::Io)?;
            if read == 0 {
                break;
            }
            client
                .write_chunk(&handle, offset, &buf[..read])
                .await
                .map_err(|err| Self::to_store_error(key, err))?;
            offset += read as u64;
        }
        client.close(&handle).await.map_err(|err| Self::to_store_error(key, err))
    }

    async fn get_file_object(&self, key: &FileKey) -> StoreResult<ByteStream> {
        let handle = self.open_either_path(key).await?;
        let client = self.client.clone();

        // Pull chunks lazily; a transport failure surfaces as an I/O error
        // on the stream instead of silent truncation.
        let chunks = futures::stream::try_unfold(
            (client, handle, 0u64),
            |(client, handle, offset)| async move {
                let chunk = {
                    let mut guard = client.lock().await;
                    guard.read_chunk(&handle, offset, CHUNK_SIZE).await
                };
                match chunk {
                    Ok(Some(data)) => {
                        let next = offset + data.len() as u64;
                        Ok(Some((std::io::Cursor::new(data), (client, handle, next))))
                    }
                    Ok(None) => {
                        let mut guard = client.lock().await;
                        let _ = guard.close(&handle).await;
                        Ok(None)
                    }
                    Err(err) => Err(std::io::Error::other(err.to_string())),
                }
            },
        );
        Ok(Box::pin(tokio_util::io::StreamReader::new(chunks)))
    }

    async fn stat(&self, key: &FileKey) -> StoreResult<FileInfo> {
        let mut client = self.client.lock().await;
        let attrs = match client.stat(&self.remote_path(key)).await {
            Ok(attrs) if !attrs.is_directory() => attrs,
            // The stowage server answers NO_SUCH_FILE itself; a plain
            // server over an old tree reports the legacy key directory.
            _ => match client.stat(&self.legacy_remote_path(key)).await {
                Ok(attrs) => attrs,
                Err(err) => return Err(Self::to_store_error(key, err)),
            },
        };
        Ok(FileInfo { size: attrs.size.unwrap_or(0) })
    }

    async fn exists(&self, key: &FileKey) -> StoreResult<bool> {
        match self.stat(key).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn close(&self) -> StoreResult<()> {
        let mut client = self.client.lock().await;
        client
            .disconnect()
            .await
            .map_err(|err| StoreErrorKind::Backend(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_paths_use_locator_layout() {
        // Constructed without a connection: only the path logic is under test.
        let key = FileKey::from_raw(
            "SHA256E-s5--2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824.txt",
        );
        let relative = posix(&locator::key_path(&key));
        assert_eq!(
            relative,
            "091/de9/SHA256E-s5--2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824.txt"
        );
        let legacy = posix(&locator::legacy_key_path(&key));
        assert!(legacy.ends_with(".txt/SHA256E-s5--2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824.txt"));
    }
}

//! Descriptor types: repositories and the filestores behind them.
//!
//! A filestore descriptor's `type` field selects the concrete backend at
//! load time; composite backends (archive, union, measure) nest child
//! descriptors.

use exn::ResultExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use stowage_keys::KeyFormat;
use stowage_sftp::SftpStore;
use stowage_store::{AnnexStore, ArchiveStore, KvStore, MeasureStore, MemoryStore, StoreHandle, UnionStore};
use uuid::Uuid;

use crate::error::{ErrorKind, Result};

/// A repository: a stable identity plus the filestore holding its payloads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepoSpec {
    pub name: String,
    /// Chosen at init, never changes for the repository's lifetime.
    pub uuid: Uuid,
    pub filestore: FilestoreSpec,
    #[serde(default)]
    pub key_format: KeyFormat,
    /// Name of the catalog engine's remote to pull this repository's
    /// branches from, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_remote: Option<String>,
}

fn default_workers() -> usize {
    ArchiveStore::DEFAULT_WORKERS
}

fn default_max_archive_size() -> u64 {
    ArchiveStore::DEFAULT_MAX_ARCHIVE_SIZE
}

fn default_ssh_port() -> u16 {
    22
}

/// One filestore backend, possibly composed of others.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FilestoreSpec {
    /// Files on disk, sharded by the locator hash of the key.
    Annex { root: PathBuf },
    /// In-memory, for tests. Nothing survives the process.
    Memory,
    /// Embedded ordered key-value store.
    Kv { path: PathBuf },
    /// Many payloads packed into a few tars; descriptors live in the
    /// secondary filestore.
    Archive {
        root: PathBuf,
        secondary: Box<FilestoreSpec>,
        #[serde(default = "default_workers")]
        workers: usize,
        #[serde(default = "default_max_archive_size")]
        max_archive_size: u64,
    },
    /// Ordered overlay: writes to the first child, reads fall through.
    Union { children: Vec<FilestoreSpec> },
    /// Wraps a child and persists count/total-bytes metrics.
    Measure { child: Box<FilestoreSpec>, stats_path: PathBuf },
    /// A remote filestore spoken to over SFTP.
    Sftp {
        host: String,
        #[serde(default = "default_ssh_port")]
        port: u16,
        user: String,
        key_file: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        root: Option<String>,
    },
}

impl FilestoreSpec {
    /// Open the described backend. Boxed because composite variants recurse.
    pub fn open(&self) -> BoxFuture<'_, Result<StoreHandle>> {
        Box::pin(async move {
            let handle: StoreHandle = match self {
                Self::Annex { root } => Arc::new(AnnexStore::new(root)),
                Self::Memory => Arc::new(MemoryStore::new()),
                Self::Kv { path } => {
                    Arc::new(KvStore::open(path).or_raise(|| ErrorKind::Filestore)?)
                }
                Self::Archive { root, secondary, workers, max_archive_size } => {
                    let secondary = secondary.open().await?;
                    let archive =
                        ArchiveStore::open(root, secondary, *workers, *max_archive_size)
                            .await
                            .or_raise(|| ErrorKind::Filestore)?;
                    Arc::new(archive)
                }
                Self::Union { children } => {
                    let mut opened = Vec::with_capacity(children.len());
                    for child in children {
                        opened.push(child.open().await?);
                    }
                    Arc::new(UnionStore::new(opened))
                }
                Self::Measure { child, stats_path } => {
                    let child = child.open().await?;
                    let measure = MeasureStore::open(child, stats_path.clone())
                        .await
                        .or_raise(|| ErrorKind::Filestore)?;
                    Arc::new(measure)
                }
                Self::Sftp { host, port, user, key_file, root } => {
                    let store = SftpStore::connect(host, *port, user, key_file, root.clone())
                        .await
                        .or_raise(|| ErrorKind::Filestore)?;
                    Arc::new(store)
                }
            };
            Ok(handle)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_store::FileStore;

    #[test]
    fn test_type_tag_selects_variant() {
        let spec: FilestoreSpec =
            serde_json::from_str(r#"{ "type": "annex", "root": "/srv/files" }"#).unwrap();
        assert!(matches!(spec, FilestoreSpec::Annex { ref root } if root == &PathBuf::from("/srv/files")));

        let spec: FilestoreSpec = serde_json::from_str(r#"{ "type": "memory" }"#).unwrap();
        assert!(matches!(spec, FilestoreSpec::Memory));
    }

    #[test]
    fn test_nested_spec_roundtrip() {
        let spec = FilestoreSpec::Union {
            children: vec![
                FilestoreSpec::Memory,
                FilestoreSpec::Measure {
                    child: Box::new(FilestoreSpec::Annex { root: PathBuf::from("/srv/files") }),
                    stats_path: PathBuf::from("/srv/stats"),
                },
            ],
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains(r#""type":"union""#));
        let back: FilestoreSpec = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, FilestoreSpec::Union { ref children } if children.len() == 2));
    }

    #[test]
    fn test_repo_spec_defaults() {
        let json = r#"{
            "name": "local",
            "uuid": "3fca31d9-f0dd-424e-b0e9-3cd4a26e9d68",
            "filestore": { "type": "memory" }
        }"#;
        let spec: RepoSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.key_format, KeyFormat::Sha256e);
        assert!(spec.catalog_remote.is_none());
    }

    #[tokio::test]
    async fn test_open_composite_store() {
        let dir = tempfile::tempdir().unwrap();
        let spec = FilestoreSpec::Archive {
            root: dir.path().join("archives"),
            secondary: Box::new(FilestoreSpec::Memory),
            workers: 2,
            max_archive_size: 1024 * 1024,
        };
        let store = spec.open().await.unwrap();
        let key = KeyFormat::Sha256e.from_bytes(b"payload", None);
        store.put_file_bytes(b"payload".to_vec(), &key).await.unwrap();
        assert_eq!(store.get_file_bytes(&key).await.unwrap(), b"payload");
        store.close().await.unwrap();
    }
}

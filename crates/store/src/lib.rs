//! Content-addressed filestores.
//!
//! A filestore maps [`FileKey`](stowage_keys::FileKey)s to byte payloads:
//! whole-file, write-once, read-many. Overwriting an existing key is an
//! error; the bytes under a key are identical in every filestore that holds
//! it, because the key is computed from the bytes.
//!
//! # Architecture
//! The [`FileStore`] trait is the uniform interface; backends live in
//! [`backend`]:
//! - [`AnnexStore`]: files on disk, sharded by a locator hash of the key.
//! - [`MemoryStore`]: in-memory map, for tests.
//! - [`KvStore`]: embedded ordered key-value store (redb).
//! - [`ArchiveStore`]: many small files packed into a few tar archives.
//! - [`UnionStore`]: ordered overlay of child filestores.
//! - [`MeasureStore`]: wraps a child and tracks count/total-size metrics.
//!
//! The SFTP-backed filestore lives in the `stowage-sftp` crate, next to the
//! protocol it speaks.
//!
//! [`Cas`] layers key computation and write batching on top of any backend.

pub mod backend;
pub mod cas;
pub mod error;
mod file;
pub mod locator;

pub use crate::backend::{
    AnnexStore, ArchiveStore, ByteStream, FileStore, KvStore, MeasureStore, MemoryStore,
    UnionStore, filestore_copy,
};
pub use crate::cas::Cas;
pub use crate::file::{FileInfo, Presence};
use std::sync::Arc;

pub type StoreHandle = Arc<dyn FileStore + Send + Sync>;

//! Metrics wrapper: counts payloads and total bytes stored through it.
//!
//! Counters are persisted as `"<count>,<total_bytes>"` in a small stats file
//! on `flush`. If the process dies between a write and a flush the counters
//! under-report; metrics are approximate by design of the batch model.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use stowage_keys::FileKey;
use tokio::io::{AsyncRead, ReadBuf};

use crate::backend::{ByteStream, FileStore};
use crate::error::{ErrorKind, Result};
use crate::file::{FileInfo, Presence};
use crate::StoreHandle;

pub struct MeasureStore {
    child: StoreHandle,
    stats_path: PathBuf,
    file_count: AtomicU64,
    total_size: AtomicU64,
}

impl MeasureStore {
    /// Wrap `child`, loading any previously persisted counters from
    /// `stats_path`.
    pub async fn open(child: StoreHandle, stats_path: impl Into<PathBuf>) -> Result<Self> {
        let stats_path = stats_path.into();
        let (file_count, total_size) = match tokio::fs::read_to_string(&stats_path).await {
            Ok(contents) => parse_stats(&contents)
                .ok_or_else(|| ErrorKind::InvalidPath(stats_path.clone()))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => (0, 0),
            Err(err) => exn::bail!(ErrorKind::Io(err)),
        };
        Ok(Self {
            child,
            stats_path,
            file_count: AtomicU64::new(file_count),
            total_size: AtomicU64::new(total_size),
        })
    }

    pub fn file_count(&self) -> u64 {
        self.file_count.load(Ordering::Relaxed)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::Relaxed)
    }

    fn record(&self, size: u64) {
        self.file_count.fetch_add(1, Ordering::Relaxed);
        self.total_size.fetch_add(size, Ordering::Relaxed);
    }
}

fn parse_stats(contents: &str) -> Option<(u64, u64)> {
    let (count, total) = contents.trim().split_once(',')?;
    Some((count.parse().ok()?, total.parse().ok()?))
}

/// Counts the bytes a wrapped stream yields, so sizes are known even for
/// payloads that pass through as streams.
struct CountingReader {
    inner: ByteStream,
    bytes_read: Arc<AtomicU64>,
}

impl AsyncRead for CountingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let me = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut me.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read = (buf.filled().len() - before) as u64;
                me.bytes_read.fetch_add(read, Ordering::Relaxed);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[async_trait]
impl FileStore for MeasureStore {
    async fn put_file(&self, path: &Path, key: &FileKey) -> Result<()> {
        let size = tokio::fs::metadata(path).await.map_err(ErrorKind::Io)?.len();
        self.child.put_file(path, key).await?;
        self.record(size);
        Ok(())
    }

    async fn put_file_object(&self, reader: ByteStream, key: &FileKey) -> Result<()> {
        let bytes_read = Arc::new(AtomicU64::new(0));
        let counting = CountingReader { inner: reader, bytes_read: bytes_read.clone() };
        self.child.put_file_object(Box::pin(counting), key).await?;
        self.record(bytes_read.load(Ordering::Relaxed));
        Ok(())
    }

    async fn put_file_bytes(&self, bytes: Vec<u8>, key: &FileKey) -> Result<()> {
        let size = bytes.len() as u64;
        self.child.put_file_bytes(bytes, key).await?;
        self.record(size);
        Ok(())
    }

    async fn get_file_object(&self, key: &FileKey) -> Result<ByteStream> {
        self.child.get_file_object(key).await
    }

    async fn stat(&self, key: &FileKey) -> Result<FileInfo> {
        self.child.stat(key).await
    }

    async fn exists(&self, key: &FileKey) -> Result<bool> {
        self.child.exists(key).await
    }

    async fn possibly_exists(&self, key: &FileKey) -> Result<Presence> {
        self.child.possibly_exists(key).await
    }

    async fn flush(&self) -> Result<()> {
        self.child.flush().await?;
        let stats = format!("{},{}", self.file_count(), self.total_size());
        tokio::fs::write(&self.stats_path, stats).await.map_err(ErrorKind::Io)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.flush().await?;
        self.child.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::assert_store_contract;
    use crate::backend::MemoryStore;
    use stowage_keys::KeyFormat;

    async fn measured(dir: &Path) -> MeasureStore {
        let child = Arc::new(MemoryStore::new()) as StoreHandle;
        MeasureStore::open(child, dir.join("stats")).await.unwrap()
    }

    #[tokio::test]
    async fn test_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = measured(dir.path()).await;
        assert_store_contract(&store).await;
    }

    #[tokio::test]
    async fn test_counters_track_streamed_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = measured(dir.path()).await;

        let key = KeyFormat::Sha256e.from_bytes(b"hello", None);
        store.put_file_bytes(b"hello".to_vec(), &key).await.unwrap();
        let streamed = KeyFormat::Sha256e.from_bytes(b"stream me", None);
        store
            .put_file_object(Box::pin(std::io::Cursor::new(b"stream me".to_vec())), &streamed)
            .await
            .unwrap();

        assert_eq!(store.file_count(), 2);
        assert_eq!(store.total_size(), 5 + 9);
    }

    #[tokio::test]
    async fn test_failed_puts_are_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let store = measured(dir.path()).await;
        let key = KeyFormat::Sha256e.from_bytes(b"hello", None);
        store.put_file_bytes(b"hello".to_vec(), &key).await.unwrap();
        store.put_file_bytes(b"hello".to_vec(), &key).await.unwrap_err();
        assert_eq!(store.file_count(), 1);
    }

    #[tokio::test]
    async fn test_stats_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let stats_path = dir.path().join("stats");
        {
            let child = Arc::new(MemoryStore::new()) as StoreHandle;
            let store = MeasureStore::open(child, &stats_path).await.unwrap();
            let key = KeyFormat::Sha256e.from_bytes(b"hello", None);
            store.put_file_bytes(b"hello".to_vec(), &key).await.unwrap();
            store.close().await.unwrap();
        }
        let child = Arc::new(MemoryStore::new()) as StoreHandle;
        let store = MeasureStore::open(child, &stats_path).await.unwrap();
        assert_eq!(store.file_count(), 1);
        assert_eq!(store.total_size(), 5);
    }
}

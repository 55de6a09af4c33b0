//! Tar-archive sharding backend.
//!
//! Many small payloads are packed into a small number of tar files. A
//! secondary filestore maps each key to an ASCII descriptor
//! `"<archive-name>:<offset>:<size>"`; readers open the named tar and seek
//! straight to the payload, so the tars are never parsed on the read path.
//!
//! Writes go through a pool of workers. Each worker owns one hot tar
//! exclusively (the queue is the only synchronisation) and rotates to a
//! fresh tar when the current one would exceed `max_archive_size`.

use async_trait::async_trait;
use std::fmt::Display;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use stowage_keys::FileKey;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::backend::{ByteStream, FileStore};
use crate::error::{ErrorKind, Result};
use crate::file::{FileInfo, Presence};
use crate::StoreHandle;

const TAR_BLOCK: u64 = 512;

fn backend_err(err: impl Display) -> ErrorKind {
    ErrorKind::Backend(err.to_string())
}

struct Job {
    key: FileKey,
    bytes: Vec<u8>,
    done: oneshot::Sender<Result<()>>,
}

pub struct ArchiveStore {
    root: PathBuf,
    secondary: StoreHandle,
    jobs: std::sync::Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ArchiveStore {
    pub const DEFAULT_WORKERS: usize = 4;
    pub const DEFAULT_MAX_ARCHIVE_SIZE: u64 = 4 * 1024 * 1024 * 1024;

    /// Open the archive directory and start the writer pool.
    #[instrument(skip_all, fields(root = %root.as_ref().display(), num_workers))]
    pub async fn open(
        root: impl AsRef<std::path::Path>,
        secondary: StoreHandle,
        num_workers: usize,
        max_archive_size: u64,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await.map_err(ErrorKind::Io)?;

        let (tx, rx) = mpsc::channel::<Job>(num_workers.max(1) * 2);
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(num_workers);
        for index in 0..num_workers.max(1) {
            let writer =
                ArchiveWriter::open(root.clone(), index, max_archive_size, secondary.clone())
                    .await?;
            workers.push(tokio::spawn(writer.run(rx.clone())));
        }
        Ok(Self {
            root,
            secondary,
            jobs: std::sync::Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    async fn enqueue(&self, key: &FileKey, bytes: Vec<u8>) -> Result<()> {
        if self.secondary.exists(key).await? {
            exn::bail!(ErrorKind::AlreadyExists(key.clone()))
        }
        let sender = self
            .jobs
            .lock()
            .expect("archive job queue lock poisoned")
            .clone();
        let Some(sender) = sender else {
            exn::bail!(ErrorKind::Backend("archive store is closed".into()))
        };
        let (done, done_rx) = oneshot::channel();
        sender
            .send(Job { key: key.clone(), bytes, done })
            .await
            .map_err(|_| ErrorKind::Backend("archive workers stopped".into()))?;
        done_rx
            .await
            .map_err(|_| ErrorKind::Backend("archive worker dropped the job".into()))?
    }

    async fn descriptor(&self, key: &FileKey) -> Result<(PathBuf, u64, u64)> {
        let raw = self.secondary.get_file_bytes(key).await?;
        let text = String::from_utf8(raw).map_err(backend_err)?;
        let mut parts = text.split(':');
        let (Some(name), Some(offset), Some(size), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            exn::bail!(backend_err(format!("malformed archive descriptor: {text}")))
        };
        let offset = offset.parse::<u64>().map_err(backend_err)?;
        let size = size.parse::<u64>().map_err(backend_err)?;
        Ok((self.root.join(name), offset, size))
    }
}

#[async_trait]
impl FileStore for ArchiveStore {
    async fn put_file_object(&self, mut reader: ByteStream, key: &FileKey) -> Result<()> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await.map_err(ErrorKind::Io)?;
        self.enqueue(key, bytes).await
    }

    async fn put_file_bytes(&self, bytes: Vec<u8>, key: &FileKey) -> Result<()> {
        self.enqueue(key, bytes).await
    }

    async fn get_file_object(&self, key: &FileKey) -> Result<ByteStream> {
        let (path, offset, size) = self.descriptor(key).await?;
        let mut file = tokio::fs::File::open(path).await.map_err(ErrorKind::Io)?;
        file.seek(SeekFrom::Start(offset)).await.map_err(ErrorKind::Io)?;
        Ok(Box::pin(file.take(size)))
    }

    async fn stat(&self, key: &FileKey) -> Result<FileInfo> {
        let (_, _, size) = self.descriptor(key).await?;
        Ok(FileInfo { size })
    }

    async fn exists(&self, key: &FileKey) -> Result<bool> {
        self.secondary.exists(key).await
    }

    async fn possibly_exists(&self, key: &FileKey) -> Result<Presence> {
        self.secondary.possibly_exists(key).await
    }

    async fn flush(&self) -> Result<()> {
        self.secondary.flush().await
    }

    async fn close(&self) -> Result<()> {
        // Dropping the sender lets the workers drain the queue and exit.
        drop(self.jobs.lock().expect("archive job queue lock poisoned").take());
        let mut workers = self.workers.lock().await;
        for worker in workers.drain(..) {
            worker.await.map_err(backend_err)?;
        }
        self.secondary.close().await
    }
}

/// One worker: exclusive owner of the current hot tar for its slot.
struct ArchiveWriter {
    root: PathBuf,
    index: usize,
    sequence: u32,
    max_archive_size: u64,
    secondary: StoreHandle,
    file: tokio::fs::File,
    len: u64,
}

impl ArchiveWriter {
    fn archive_name(index: usize, sequence: u32) -> String {
        format!("archive-{index:02}-{sequence:04}.tar")
    }

    fn parse_sequence(name: &str, index: usize) -> Option<u32> {
        name.strip_prefix(&format!("archive-{index:02}-"))?
            .strip_suffix(".tar")?
            .parse()
            .ok()
    }

    async fn open(
        root: PathBuf,
        index: usize,
        max_archive_size: u64,
        secondary: StoreHandle,
    ) -> Result<Self> {
        // Resume the highest existing sequence for this slot.
        let mut sequence = 0;
        let mut entries = tokio::fs::read_dir(&root).await.map_err(ErrorKind::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(ErrorKind::Io)? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(seq) = Self::parse_sequence(name, index) {
                    sequence = sequence.max(seq);
                }
            }
        }
        let (file, len) = Self::open_tar(&root, index, sequence).await?;
        Ok(Self { root, index, sequence, max_archive_size, secondary, file, len })
    }

    async fn open_tar(
        root: &std::path::Path,
        index: usize,
        sequence: u32,
    ) -> Result<(tokio::fs::File, u64)> {
        let path = root.join(Self::archive_name(index, sequence));
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(ErrorKind::Io)?;
        let len = file.metadata().await.map_err(ErrorKind::Io)?.len();
        Ok((file, len))
    }

    async fn run(mut self, jobs: Arc<Mutex<mpsc::Receiver<Job>>>) {
        loop {
            // The lock is held only while waiting; writing happens with the
            // queue released so the other workers keep draining it.
            let job = { jobs.lock().await.recv().await };
            let Some(job) = job else { break };
            let result = self.append(&job.key, &job.bytes).await;
            // The submitter may have gone away; the entry is durable anyway.
            let _ = job.done.send(result);
        }
    }

    async fn append(&mut self, key: &FileKey, bytes: &[u8]) -> Result<()> {
        let padded = (bytes.len() as u64).div_ceil(TAR_BLOCK) * TAR_BLOCK;
        let entry_len = TAR_BLOCK + padded;
        if self.len > 0 && self.len + entry_len > self.max_archive_size {
            self.rotate().await?;
        }

        let mut header = tar::Header::new_gnu();
        header.set_path(key.as_str()).map_err(ErrorKind::Io)?;
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();

        let offset = self.len + TAR_BLOCK;
        self.file.write_all(header.as_bytes()).await.map_err(ErrorKind::Io)?;
        self.file.write_all(bytes).await.map_err(ErrorKind::Io)?;
        let padding = (padded - bytes.len() as u64) as usize;
        if padding > 0 {
            self.file.write_all(&vec![0u8; padding]).await.map_err(ErrorKind::Io)?;
        }
        self.file.flush().await.map_err(ErrorKind::Io)?;
        self.len += entry_len;

        let descriptor =
            format!("{}:{offset}:{}", Self::archive_name(self.index, self.sequence), bytes.len());
        self.secondary.put_file_bytes(descriptor.into_bytes(), key).await
    }

    async fn rotate(&mut self) -> Result<()> {
        self.sequence += 1;
        debug!(worker = self.index, sequence = self.sequence, "rotating archive");
        let (file, len) = Self::open_tar(&self.root, self.index, self.sequence).await?;
        self.file = file;
        self.len = len;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::assert_store_contract;
    use crate::backend::MemoryStore;

    use stowage_keys::KeyFormat;

    async fn archive_store(root: &std::path::Path, max_size: u64) -> ArchiveStore {
        let secondary = Arc::new(MemoryStore::new()) as StoreHandle;
        ArchiveStore::open(root, secondary, 4, max_size).await.unwrap()
    }

    #[tokio::test]
    async fn test_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = archive_store(dir.path(), ArchiveStore::DEFAULT_MAX_ARCHIVE_SIZE).await;
        assert_store_contract(&store).await;
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rotation_spreads_keys_over_multiple_tars() {
        let dir = tempfile::tempdir().unwrap();
        let store = archive_store(dir.path(), 1024).await;

        let mut keys = Vec::new();
        for i in 0..40 {
            let payload = format!("{i:03}").into_bytes();
            let key = KeyFormat::Sha256e.from_bytes(&payload, None);
            store.put_file_bytes(payload, &key).await.unwrap();
            keys.push(key);
        }

        let mut tars = 0;
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry.file_name().to_string_lossy().ends_with(".tar") {
                tars += 1;
            }
        }
        assert!(tars > 1, "expected rotation to produce more than one tar, got {tars}");

        // Reads come back byte-faithful regardless of which tar holds them.
        for (i, key) in keys.iter().enumerate().step_by(4) {
            let bytes = store.get_file_bytes(key).await.unwrap();
            assert_eq!(bytes, format!("{i:03}").into_bytes());
            assert_eq!(store.stat(key).await.unwrap().size, 3);
        }
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_payload_offsets_are_block_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let secondary = Arc::new(MemoryStore::new()) as StoreHandle;
        let store =
            ArchiveStore::open(dir.path(), secondary.clone(), 1, u64::MAX).await.unwrap();

        let first = KeyFormat::Sha256e.from_bytes(b"first", None);
        let second = KeyFormat::Sha256e.from_bytes(b"second!", None);
        store.put_file_bytes(b"first".to_vec(), &first).await.unwrap();
        store.put_file_bytes(b"second!".to_vec(), &second).await.unwrap();

        let descriptor = String::from_utf8(secondary.get_file_bytes(&second).await.unwrap()).unwrap();
        let offset: u64 = descriptor.split(':').nth(1).unwrap().parse().unwrap();
        // First entry occupies header + one padded block; the second payload
        // starts right after the second header.
        assert_eq!(offset, 512 + 512 + 512);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_store_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = archive_store(dir.path(), 1024).await;
        store.close().await.unwrap();
        let key = KeyFormat::Sha256e.from_bytes(b"late", None);
        let err = store.put_file_bytes(b"late".to_vec(), &key).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Backend(_)));
    }
}

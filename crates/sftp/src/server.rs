//! The SFTP server: exposes one filestore to authenticated peers.
//!
//! The server speaks just enough SFTP v3 for content-addressed transfer.
//! The path a client presents is stripped to its trailing segment and parsed
//! as a file key; directories do not exist (MKDIR/RMDIR succeed as no-ops so
//! stock clients that pre-create path prefixes keep working).
//!
//! Uploads land in a per-session sandbox directory. On CLOSE the server
//! recomputes the key from the received bytes and refuses the upload when it
//! does not match the declared key, so a corrupt or dishonest transfer never
//! reaches the filestore.

use async_trait::async_trait;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stowage_keys::{FileKey, KeyFormat};
use stowage_store::{ByteStream, FileStore, StoreHandle};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::auth::AuthorizedKeys;
use crate::error::{ErrorKind, Result};
use crate::proto;
use crate::proto::{Attrs, FrameBuffer, Reader};

/// Largest read the server will answer in one DATA packet.
const MAX_READ: u32 = 256 * 1024;

pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    /// Directory of authorized `*.pub` keys.
    pub authorized_keys_dir: PathBuf,
    /// The server's host key (OpenSSH or PKCS#8 PEM).
    pub host_key: PathBuf,
}

/// Load keys and serve `store` until the task is cancelled.
pub async fn serve(store: StoreHandle, key_format: KeyFormat, options: &ServeOptions) -> Result<()> {
    let host_key = russh_keys::load_secret_key(&options.host_key, None)
        .map_err(|err| ErrorKind::Ssh(err.to_string()))?;
    let authorized = Arc::new(AuthorizedKeys::load(&options.authorized_keys_dir).await?);
    let server = SftpServer::new(store, key_format, authorized);
    let config = Arc::new(russh::server::Config {
        // Public key only; no password, no keyboard-interactive.
        methods: russh::MethodSet::PUBLICKEY,
        auth_rejection_time: Duration::from_secs(1),
        keys: vec![host_key],
        ..Default::default()
    });
    info!(host = %options.host, port = options.port, "serving filestore over sftp");
    russh::server::run(config, (options.host.as_str(), options.port), server)
        .await
        .map_err(ErrorKind::from)?;
    Ok(())
}

/// Accepts connections; every client gets its own [`SessionHandler`].
#[derive(Clone)]
pub struct SftpServer {
    store: StoreHandle,
    key_format: KeyFormat,
    authorized: Arc<AuthorizedKeys>,
}

impl SftpServer {
    pub fn new(store: StoreHandle, key_format: KeyFormat, authorized: Arc<AuthorizedKeys>) -> Self {
        Self { store, key_format, authorized }
    }
}

impl russh::server::Server for SftpServer {
    type Handler = SessionHandler;

    fn new_client(&mut self, peer: Option<SocketAddr>) -> SessionHandler {
        debug!(?peer, "ssh client connected");
        SessionHandler {
            store: self.store.clone(),
            key_format: self.key_format,
            authorized: self.authorized.clone(),
            sftp: None,
            sftp_channel: None,
            frames: FrameBuffer::default(),
        }
    }
}

pub struct SessionHandler {
    store: StoreHandle,
    key_format: KeyFormat,
    authorized: Arc<AuthorizedKeys>,
    sftp: Option<SftpSession>,
    sftp_channel: Option<ChannelId>,
    frames: FrameBuffer,
}

#[async_trait]
impl russh::server::Handler for SessionHandler {
    type Error = russh::Error;

    async fn auth_publickey(
        self,
        user: &str,
        key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<(Self, Auth), Self::Error> {
        if self.authorized.contains(key) {
            Ok((self, Auth::Accept))
        } else {
            warn!(user, "rejecting unknown public key");
            Ok((self, Auth::Reject { proceed_with_methods: None }))
        }
    }

    async fn channel_open_session(
        self,
        _channel: Channel<Msg>,
        session: Session,
    ) -> std::result::Result<(Self, bool, Session), Self::Error> {
        Ok((self, true, session))
    }

    async fn subsystem_request(
        mut self,
        channel: ChannelId,
        name: &str,
        mut session: Session,
    ) -> std::result::Result<(Self, Session), Self::Error> {
        if name == "sftp" && self.sftp.is_none() {
            match SftpSession::new(self.store.clone(), self.key_format) {
                Ok(sftp) => {
                    self.sftp = Some(sftp);
                    self.sftp_channel = Some(channel);
                    session.channel_success(channel);
                }
                Err(err) => {
                    warn!("could not set up sftp session: {err}");
                    session.channel_failure(channel);
                }
            }
        } else {
            session.channel_failure(channel);
        }
        Ok((self, session))
    }

    async fn data(
        mut self,
        channel: ChannelId,
        data: &[u8],
        mut session: Session,
    ) -> std::result::Result<(Self, Session), Self::Error> {
        if Some(channel) == self.sftp_channel {
            self.frames.push(data);
            while let Some(frame) = self.frames.next_frame() {
                if let Some(sftp) = self.sftp.as_mut() {
                    let reply = sftp.handle_frame(&frame).await;
                    session.data(channel, CryptoVec::from_slice(&reply));
                }
            }
        }
        Ok((self, session))
    }
}

enum HandleState {
    Read { reader: ByteStream, pos: u64, size: u64 },
    Write { file: tokio::fs::File, path: PathBuf, declared: FileKey, written: u64 },
}

/// One client's SFTP state: open handles and the upload sandbox.
pub struct SftpSession {
    store: StoreHandle,
    key_format: KeyFormat,
    sandbox: tempfile::TempDir,
    handles: HashMap<u32, HandleState>,
    next_handle: u32,
}

impl SftpSession {
    pub fn new(store: StoreHandle, key_format: KeyFormat) -> std::io::Result<Self> {
        Ok(Self {
            store,
            key_format,
            sandbox: tempfile::TempDir::new()?,
            handles: HashMap::new(),
            next_handle: 0,
        })
    }

    /// Process one request packet (without its length prefix) and produce
    /// the reply packet. Every supported request has exactly one reply.
    pub async fn handle_frame(&mut self, frame: &[u8]) -> Vec<u8> {
        let mut reader = Reader::new(frame);
        let packet_type = match reader.u8() {
            Ok(value) => value,
            Err(_) => return proto::status(0, proto::SSH_FX_BAD_MESSAGE, "empty packet"),
        };
        if packet_type == proto::SSH_FXP_INIT {
            return proto::version();
        }
        let id = match reader.u32() {
            Ok(value) => value,
            Err(_) => return proto::status(0, proto::SSH_FX_BAD_MESSAGE, "missing request id"),
        };
        let result = match packet_type {
            proto::SSH_FXP_OPEN => self.open(id, &mut reader).await,
            proto::SSH_FXP_CLOSE => self.close(id, &mut reader).await,
            proto::SSH_FXP_READ => self.read(id, &mut reader).await,
            proto::SSH_FXP_WRITE => self.write(id, &mut reader).await,
            proto::SSH_FXP_STAT | proto::SSH_FXP_LSTAT => self.stat(id, &mut reader).await,
            proto::SSH_FXP_FSTAT => self.fstat(id, &mut reader),
            // The annex has no directories; accept these so stock clients
            // that pre-create path prefixes keep working.
            proto::SSH_FXP_MKDIR | proto::SSH_FXP_RMDIR => {
                Ok(proto::status(id, proto::SSH_FX_OK, ""))
            }
            _ => Ok(proto::status(id, proto::SSH_FX_OP_UNSUPPORTED, "operation not supported")),
        };
        result.unwrap_or_else(|err| proto::status(id, proto::SSH_FX_BAD_MESSAGE, &err.to_string()))
    }

    fn store_error_status(id: u32, err: &stowage_store::error::Error) -> Vec<u8> {
        let code = if err.is_not_found() {
            proto::SSH_FX_NO_SUCH_FILE
        } else {
            proto::SSH_FX_FAILURE
        };
        proto::status(id, code, &err.to_string())
    }

    async fn open(&mut self, id: u32, reader: &mut Reader<'_>) -> Result<Vec<u8>> {
        let path = reader.bytes()?.to_vec();
        let pflags = reader.u32()?;
        let _attrs = Attrs::decode(reader)?;

        let name = proto::trailing_segment(&path);
        let Some(key) = self.key_format.try_parse(name) else {
            return Ok(proto::status(id, proto::SSH_FX_FAILURE, "path is not a file key"));
        };

        if pflags & proto::SSH_FXF_CREAT != 0 {
            self.open_for_create(id, key).await
        } else if pflags & proto::SSH_FXF_READ != 0 {
            self.open_for_read(id, key).await
        } else {
            Ok(proto::status(
                id,
                proto::SSH_FX_OP_UNSUPPORTED,
                "only read and create are supported",
            ))
        }
    }

    async fn open_for_create(&mut self, id: u32, key: FileKey) -> Result<Vec<u8>> {
        match self.store.exists(&key).await {
            Ok(true) => {
                return Ok(proto::status(
                    id,
                    proto::SSH_FX_FAILURE,
                    &format!("file already exists: {key}"),
                ));
            }
            Ok(false) => {}
            Err(err) => return Ok(Self::store_error_status(id, &err)),
        }
        let (file, path) = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(self.sandbox.path())
            .map_err(ErrorKind::Io)?
            .keep()
            .map_err(|err| ErrorKind::Io(err.error))?;
        let file = tokio::fs::File::from_std(file);
        debug!(key = %key, staging = %path.display(), "upload started");
        let handle = self.insert_handle(HandleState::Write { file, path, declared: key, written: 0 });
        Ok(proto::handle(id, &handle.to_be_bytes()))
    }

    async fn open_for_read(&mut self, id: u32, key: FileKey) -> Result<Vec<u8>> {
        let size = match self.store.stat(&key).await {
            Ok(info) => info.size,
            Err(err) => return Ok(Self::store_error_status(id, &err)),
        };
        let reader = match self.store.get_file_object(&key).await {
            Ok(reader) => reader,
            Err(err) => return Ok(Self::store_error_status(id, &err)),
        };
        let handle = self.insert_handle(HandleState::Read { reader, pos: 0, size });
        Ok(proto::handle(id, &handle.to_be_bytes()))
    }

    fn insert_handle(&mut self, state: HandleState) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(handle, state);
        handle
    }

    fn parse_handle(reader: &mut Reader<'_>) -> Result<u32> {
        let raw = reader.bytes()?;
        let bytes: [u8; 4] = raw
            .try_into()
            .map_err(|_| ErrorKind::Protocol("malformed handle".into()))?;
        Ok(u32::from_be_bytes(bytes))
    }

    async fn read(&mut self, id: u32, reader: &mut Reader<'_>) -> Result<Vec<u8>> {
        let handle = Self::parse_handle(reader)?;
        let offset = reader.u64()?;
        let len = reader.u32()?.min(MAX_READ);

        let Some(HandleState::Read { reader: stream, pos, .. }) = self.handles.get_mut(&handle)
        else {
            return Ok(proto::status(id, proto::SSH_FX_FAILURE, "not a read handle"));
        };

        // Streams only go forward: earlier offsets cannot be revisited,
        // later ones are reached by discarding.
        if offset < *pos {
            return Ok(proto::status(id, proto::SSH_FX_FAILURE, "non-sequential read"));
        }
        let mut to_skip = offset - *pos;
        let mut scratch = vec![0u8; 64 * 1024];
        while to_skip > 0 {
            let chunk = scratch.len().min(to_skip as usize);
            let read = stream.read(&mut scratch[..chunk]).await.map_err(ErrorKind::Io)?;
            if read == 0 {
                break;
            }
            *pos += read as u64;
            to_skip -= read as u64;
        }

        let mut buf = vec![0u8; len as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let read = stream.read(&mut buf[filled..]).await.map_err(ErrorKind::Io)?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        *pos += filled as u64;
        if filled == 0 {
            return Ok(proto::status(id, proto::SSH_FX_EOF, "end of file"));
        }
        Ok(proto::data(id, &buf[..filled]))
    }

    async fn write(&mut self, id: u32, reader: &mut Reader<'_>) -> Result<Vec<u8>> {
        let handle = Self::parse_handle(reader)?;
        let offset = reader.u64()?;
        let payload = reader.bytes()?;

        let Some(HandleState::Write { file, written, .. }) = self.handles.get_mut(&handle) else {
            return Ok(proto::status(id, proto::SSH_FX_FAILURE, "not a write handle"));
        };
        file.seek(SeekFrom::Start(offset)).await.map_err(ErrorKind::Io)?;
        file.write_all(payload).await.map_err(ErrorKind::Io)?;
        *written = (*written).max(offset + payload.len() as u64);
        Ok(proto::status(id, proto::SSH_FX_OK, ""))
    }

    async fn close(&mut self, id: u32, reader: &mut Reader<'_>) -> Result<Vec<u8>> {
        let handle = Self::parse_handle(reader)?;
        match self.handles.remove(&handle) {
            None => Ok(proto::status(id, proto::SSH_FX_FAILURE, "unknown handle")),
            Some(HandleState::Read { .. }) => Ok(proto::status(id, proto::SSH_FX_OK, "")),
            Some(HandleState::Write { mut file, path, declared, .. }) => {
                file.flush().await.map_err(ErrorKind::Io)?;
                file.sync_all().await.map_err(ErrorKind::Io)?;
                drop(file);
                self.finish_upload(id, path, declared).await
            }
        }
    }

    /// Verify the received bytes against the declared key, then move the
    /// staged file into the filestore. A mismatch discards the staging file
    /// and leaves the store untouched.
    async fn finish_upload(&mut self, id: u32, path: PathBuf, declared: FileKey) -> Result<Vec<u8>> {
        let extension = declared.extension().map(str::to_owned);
        let computed = match self.key_format.from_file(&path, extension.as_deref()).await {
            Ok(key) => key,
            Err(err) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(proto::status(id, proto::SSH_FX_FAILURE, &err.to_string()));
            }
        };
        if computed != declared {
            let _ = tokio::fs::remove_file(&path).await;
            let mismatch = ErrorKind::KeyMismatch { declared, computed };
            warn!("{mismatch}");
            return Ok(proto::status(id, proto::SSH_FX_FAILURE, &mismatch.to_string()));
        }
        if let Err(err) = self.store.put_file(&path, &declared).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(Self::store_error_status(id, &err));
        }
        // put_file may have copied instead of moved.
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(&path).await;
        }
        debug!(key = %declared, "upload accepted");
        Ok(proto::status(id, proto::SSH_FX_OK, ""))
    }

    async fn stat(&mut self, id: u32, reader: &mut Reader<'_>) -> Result<Vec<u8>> {
        let path = reader.bytes()?;
        let name = proto::trailing_segment(path);
        match self.key_format.try_parse(name) {
            Some(key) => match self.store.stat(&key).await {
                Ok(info) => Ok(proto::attrs_reply(id, &Attrs::regular(info.size))),
                Err(err) => Ok(Self::store_error_status(id, &err)),
            },
            // Anything that does not parse as a key is a virtual directory.
            None => Ok(proto::attrs_reply(id, &Attrs::directory())),
        }
    }

    fn fstat(&mut self, id: u32, reader: &mut Reader<'_>) -> Result<Vec<u8>> {
        let handle = Self::parse_handle(reader)?;
        match self.handles.get(&handle) {
            Some(HandleState::Read { size, .. }) => {
                Ok(proto::attrs_reply(id, &Attrs::regular(*size)))
            }
            Some(HandleState::Write { written, .. }) => {
                Ok(proto::attrs_reply(id, &Attrs::regular(*written)))
            }
            None => Ok(proto::status(id, proto::SSH_FX_FAILURE, "unknown handle")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{
        SSH_FX_EOF, SSH_FX_FAILURE, SSH_FX_NO_SUCH_FILE, SSH_FX_OK, SSH_FX_OP_UNSUPPORTED,
        SSH_FXF_CREAT, SSH_FXF_READ, SSH_FXF_WRITE, SSH_FXP_ATTRS, SSH_FXP_DATA, SSH_FXP_HANDLE,
        SSH_FXP_STATUS, SSH_FXP_VERSION,
    };
    use stowage_store::MemoryStore;

    fn session_with(store: Arc<MemoryStore>) -> SftpSession {
        SftpSession::new(store, KeyFormat::Sha256e).unwrap()
    }

    /// Feed a full packet (length prefix included) to the session.
    async fn roundtrip(session: &mut SftpSession, packet: Vec<u8>) -> Vec<u8> {
        session.handle_frame(&packet[4..]).await
    }

    fn reply_type(reply: &[u8]) -> u8 {
        reply[4]
    }

    fn status_code(reply: &[u8]) -> u32 {
        assert_eq!(reply_type(reply), SSH_FXP_STATUS);
        u32::from_be_bytes([reply[9], reply[10], reply[11], reply[12]])
    }

    fn reply_handle(reply: &[u8]) -> Vec<u8> {
        assert_eq!(reply_type(reply), SSH_FXP_HANDLE);
        let mut reader = Reader::new(&reply[4..]);
        reader.u8().unwrap();
        reader.u32().unwrap();
        reader.bytes().unwrap().to_vec()
    }

    const HELLO_KEY: &str =
        "SHA256E-s5--2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824.txt";

    #[tokio::test]
    async fn test_init_negotiates_version_3() {
        let mut session = session_with(Arc::new(MemoryStore::new()));
        let reply = roundtrip(&mut session, proto::init()).await;
        assert_eq!(reply_type(&reply), SSH_FXP_VERSION);
    }

    #[tokio::test]
    async fn test_upload_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let mut session = session_with(store.clone());

        let open = roundtrip(
            &mut session,
            proto::open(1, &format!("a/b/{HELLO_KEY}"), SSH_FXF_CREAT | SSH_FXF_WRITE),
        )
        .await;
        let handle = reply_handle(&open);
        let write = roundtrip(&mut session, proto::write(2, &handle, 0, b"hello")).await;
        assert_eq!(status_code(&write), SSH_FX_OK);
        let close = roundtrip(&mut session, proto::close(3, &handle)).await;
        assert_eq!(status_code(&close), SSH_FX_OK);

        let key = FileKey::from_raw(HELLO_KEY);
        assert_eq!(store.get_file_bytes(&key).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_key_mismatch_discards_upload() {
        let store = Arc::new(MemoryStore::new());
        let mut session = session_with(store.clone());

        // Declared key is for five zero bytes of digest: not "hello".
        let bogus = format!("SHA256E-s5--{}.txt", "0".repeat(64));
        let open =
            roundtrip(&mut session, proto::open(1, &bogus, SSH_FXF_CREAT | SSH_FXF_WRITE)).await;
        let handle = reply_handle(&open);
        roundtrip(&mut session, proto::write(2, &handle, 0, b"hello")).await;
        let close = roundtrip(&mut session, proto::close(3, &handle)).await;
        assert_eq!(status_code(&close), SSH_FX_FAILURE);

        // Nothing reached the store, and the sandbox is clean.
        assert!(!store.exists(&FileKey::from_raw(&bogus)).await.unwrap());
        let mut leftovers = std::fs::read_dir(session.sandbox.path()).unwrap();
        assert!(leftovers.next().is_none());
    }

    #[tokio::test]
    async fn test_create_refuses_existing_key() {
        let key = FileKey::from_raw(HELLO_KEY);
        let store = Arc::new(MemoryStore::with_files([(key, b"hello".to_vec())]));
        let mut session = session_with(store);
        let open =
            roundtrip(&mut session, proto::open(1, HELLO_KEY, SSH_FXF_CREAT | SSH_FXF_WRITE)).await;
        assert_eq!(status_code(&open), SSH_FX_FAILURE);
    }

    #[tokio::test]
    async fn test_download_roundtrip_with_eof() {
        let key = FileKey::from_raw(HELLO_KEY);
        let store = Arc::new(MemoryStore::with_files([(key, b"hello".to_vec())]));
        let mut session = session_with(store);

        let open = roundtrip(&mut session, proto::open(1, HELLO_KEY, SSH_FXF_READ)).await;
        let handle = reply_handle(&open);

        let data = roundtrip(&mut session, proto::read(2, &handle, 0, 3)).await;
        assert_eq!(reply_type(&data), SSH_FXP_DATA);
        let data2 = roundtrip(&mut session, proto::read(3, &handle, 3, 100)).await;
        assert_eq!(reply_type(&data2), SSH_FXP_DATA);
        let eof = roundtrip(&mut session, proto::read(4, &handle, 5, 100)).await;
        assert_eq!(status_code(&eof), SSH_FX_EOF);
        let close = roundtrip(&mut session, proto::close(5, &handle)).await;
        assert_eq!(status_code(&close), SSH_FX_OK);
    }

    #[tokio::test]
    async fn test_open_missing_key_is_no_such_file() {
        let mut session = session_with(Arc::new(MemoryStore::new()));
        let open = roundtrip(&mut session, proto::open(1, HELLO_KEY, SSH_FXF_READ)).await;
        assert_eq!(status_code(&open), SSH_FX_NO_SUCH_FILE);
    }

    #[tokio::test]
    async fn test_stat_distinguishes_files_directories_and_missing() {
        let key = FileKey::from_raw(HELLO_KEY);
        let store = Arc::new(MemoryStore::with_files([(key, b"hello".to_vec())]));
        let mut session = session_with(store);

        let file = roundtrip(&mut session, proto::stat(1, HELLO_KEY)).await;
        assert_eq!(reply_type(&file), SSH_FXP_ATTRS);

        let dir = roundtrip(&mut session, proto::stat(2, "091/de9")).await;
        assert_eq!(reply_type(&dir), SSH_FXP_ATTRS);
        let mut reader = Reader::new(&dir[4..]);
        reader.u8().unwrap();
        reader.u32().unwrap();
        assert!(Attrs::decode(&mut reader).unwrap().is_directory());

        let missing_key = format!("SHA256E-s9--{}", "a".repeat(64));
        let missing = roundtrip(&mut session, proto::stat(3, &missing_key)).await;
        assert_eq!(status_code(&missing), SSH_FX_NO_SUCH_FILE);
    }

    #[tokio::test]
    async fn test_whitelist_boundaries() {
        let mut session = session_with(Arc::new(MemoryStore::new()));

        // MKDIR is an accepted no-op.
        let mkdir = roundtrip(&mut session, proto::mkdir(1, "091/de9")).await;
        assert_eq!(status_code(&mkdir), SSH_FX_OK);

        // Everything outside the whitelist is unsupported.
        let mut remove = proto::Builder::new(proto::SSH_FXP_REMOVE);
        remove.u32(2).bytes(HELLO_KEY.as_bytes());
        let reply = roundtrip(&mut session, remove.finish()).await;
        assert_eq!(status_code(&reply), SSH_FX_OP_UNSUPPORTED);

        let mut rename = proto::Builder::new(proto::SSH_FXP_RENAME);
        rename.u32(3).bytes(b"a").bytes(b"b");
        let reply = roundtrip(&mut session, rename.finish()).await;
        assert_eq!(status_code(&reply), SSH_FX_OP_UNSUPPORTED);
    }
}

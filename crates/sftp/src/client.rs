//! SFTP client: one SSH session, one subsystem channel, strictly sequential
//! request/response over the v3 subset.

use async_trait::async_trait;
use russh::client::{self, Msg};
use russh::{Channel, ChannelMsg};
use russh_keys::PublicKeyBase64;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ErrorKind, Result};
use crate::proto;
use crate::proto::{Attrs, FrameBuffer, Reader};

/// A reply from the server, already parsed.
#[derive(Debug)]
pub enum Response {
    Version,
    Status { code: u32, message: String },
    Handle(Vec<u8>),
    Data(Vec<u8>),
    Attrs(Attrs),
}

struct ClientHandler {
    /// Raw blob of the expected host key; `None` accepts any host key (the
    /// transfer is still end-to-end verified by the declared file keys).
    pinned_host_key: Option<Vec<u8>>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        self,
        server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<(Self, bool), Self::Error> {
        let accept = match &self.pinned_host_key {
            Some(pinned) => server_public_key.public_key_bytes() == *pinned,
            None => true,
        };
        Ok((self, accept))
    }
}

pub struct SftpClient {
    handle: client::Handle<ClientHandler>,
    channel: Channel<Msg>,
    frames: FrameBuffer,
    next_id: u32,
}

impl SftpClient {
    /// Open an SSH session, authenticate with the client key, start the
    /// `sftp` subsystem and negotiate version 3.
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        key_file: &Path,
        pinned_host_key: Option<Vec<u8>>,
    ) -> Result<Self> {
        let key_pair = russh_keys::load_secret_key(key_file, None)
            .map_err(|err| ErrorKind::Ssh(err.to_string()))?;
        let config = Arc::new(client::Config::default());
        let handler = ClientHandler { pinned_host_key };
        let mut handle =
            client::connect(config, (host, port), handler).await.map_err(ErrorKind::from)?;
        let authenticated = handle
            .authenticate_publickey(user, Arc::new(key_pair))
            .await
            .map_err(ErrorKind::from)?;
        if !authenticated {
            exn::bail!(ErrorKind::AuthFailed)
        }
        let mut channel = handle.channel_open_session().await.map_err(ErrorKind::from)?;
        channel.request_subsystem(true, "sftp").await.map_err(ErrorKind::from)?;

        let mut sftp = Self { handle, channel, frames: FrameBuffer::default(), next_id: 0 };
        match sftp.roundtrip(proto::init()).await? {
            Response::Version => {
                debug!(host, port, "sftp session established");
                Ok(sftp)
            }
            other => exn::bail!(ErrorKind::Protocol(format!("expected VERSION, got {other:?}"))),
        }
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Send one packet and wait for the next reply frame. Requests are
    /// strictly sequential on this connection.
    async fn roundtrip(&mut self, packet: Vec<u8>) -> Result<Response> {
        self.channel.data(&packet[..]).await.map_err(ErrorKind::from)?;
        loop {
            if let Some(frame) = self.frames.next_frame() {
                return parse_response(&frame).map(|(_, response)| response);
            }
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => self.frames.push(&data),
                Some(ChannelMsg::Eof | ChannelMsg::Close) | None => {
                    exn::bail!(ErrorKind::Protocol("connection closed mid-request".into()))
                }
                Some(_) => continue,
            }
        }
    }

    /// Expect a STATUS reply; `SSH_FX_OK` succeeds, anything else becomes a
    /// [`Remote`](ErrorKind::Remote) error.
    fn expect_ok(response: Response) -> Result<()> {
        match response {
            Response::Status { code: proto::SSH_FX_OK, .. } => Ok(()),
            Response::Status { code, message } => {
                exn::bail!(ErrorKind::Remote { code, message })
            }
            other => exn::bail!(ErrorKind::Protocol(format!("expected STATUS, got {other:?}"))),
        }
    }

    pub async fn open_read(&mut self, path: &str) -> Result<Vec<u8>> {
        let id = self.next_id();
        match self.roundtrip(proto::open(id, path, proto::SSH_FXF_READ)).await? {
            Response::Handle(handle) => Ok(handle),
            Response::Status { code, message } => exn::bail!(ErrorKind::Remote { code, message }),
            other => exn::bail!(ErrorKind::Protocol(format!("expected HANDLE, got {other:?}"))),
        }
    }

    pub async fn open_create(&mut self, path: &str) -> Result<Vec<u8>> {
        let id = self.next_id();
        let pflags = proto::SSH_FXF_CREAT | proto::SSH_FXF_WRITE | proto::SSH_FXF_EXCL;
        match self.roundtrip(proto::open(id, path, pflags)).await? {
            Response::Handle(handle) => Ok(handle),
            Response::Status { code, message } => exn::bail!(ErrorKind::Remote { code, message }),
            other => exn::bail!(ErrorKind::Protocol(format!("expected HANDLE, got {other:?}"))),
        }
    }

    /// Read up to `len` bytes at `offset`. `None` signals EOF.
    pub async fn read_chunk(
        &mut self,
        handle: &[u8],
        offset: u64,
        len: u32,
    ) -> Result<Option<Vec<u8>>> {
        let id = self.next_id();
        match self.roundtrip(proto::read(id, handle, offset, len)).await? {
            Response::Data(data) => Ok(Some(data)),
            Response::Status { code: proto::SSH_FX_EOF, .. } => Ok(None),
            Response::Status { code, message } => exn::bail!(ErrorKind::Remote { code, message }),
            other => exn::bail!(ErrorKind::Protocol(format!("expected DATA, got {other:?}"))),
        }
    }

    pub async fn write_chunk(&mut self, handle: &[u8], offset: u64, data: &[u8]) -> Result<()> {
        let id = self.next_id();
        let response = self.roundtrip(proto::write(id, handle, offset, data)).await?;
        Self::expect_ok(response)
    }

    /// Close a handle. For uploads this is where the server verifies the
    /// declared key against the received bytes.
    pub async fn close(&mut self, handle: &[u8]) -> Result<()> {
        let id = self.next_id();
        let response = self.roundtrip(proto::close(id, handle)).await?;
        Self::expect_ok(response)
    }

    pub async fn stat(&mut self, path: &str) -> Result<Attrs> {
        let id = self.next_id();
        match self.roundtrip(proto::stat(id, path)).await? {
            Response::Attrs(attrs) => Ok(attrs),
            Response::Status { code, message } => exn::bail!(ErrorKind::Remote { code, message }),
            other => exn::bail!(ErrorKind::Protocol(format!("expected ATTRS, got {other:?}"))),
        }
    }

    /// Best-effort MKDIR for plain SFTP servers that need path prefixes to
    /// exist; the stowage server treats it as a no-op anyway.
    pub async fn mkdir(&mut self, path: &str) -> Result<()> {
        let id = self.next_id();
        let response = self.roundtrip(proto::mkdir(id, path)).await?;
        Self::expect_ok(response)
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(ErrorKind::from)?;
        Ok(())
    }
}

fn parse_response(frame: &[u8]) -> Result<(u32, Response)> {
    let mut reader = Reader::new(frame);
    let packet_type = reader.u8()?;
    if packet_type == proto::SSH_FXP_VERSION {
        let version = reader.u32()?;
        if version != proto::VERSION {
            exn::bail!(ErrorKind::Protocol(format!("unsupported sftp version {version}")))
        }
        return Ok((0, Response::Version));
    }
    let id = reader.u32()?;
    let response = match packet_type {
        proto::SSH_FXP_STATUS => {
            let code = reader.u32()?;
            let message = reader.string().unwrap_or_default();
            Response::Status { code, message }
        }
        proto::SSH_FXP_HANDLE => Response::Handle(reader.bytes()?.to_vec()),
        proto::SSH_FXP_DATA => Response::Data(reader.bytes()?.to_vec()),
        proto::SSH_FXP_ATTRS => Response::Attrs(Attrs::decode(&mut reader)?),
        other => exn::bail!(ErrorKind::Protocol(format!("unexpected reply type {other}"))),
    };
    Ok((id, response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_response() {
        let packet = proto::status(9, proto::SSH_FX_FAILURE, "nope");
        let (id, response) = parse_response(&packet[4..]).unwrap();
        assert_eq!(id, 9);
        assert!(matches!(
            response,
            Response::Status { code: proto::SSH_FX_FAILURE, ref message } if message == "nope"
        ));
    }

    #[test]
    fn test_parse_version_and_handle() {
        let (_, response) = parse_response(&proto::version()[4..]).unwrap();
        assert!(matches!(response, Response::Version));

        let packet = proto::handle(3, &7u32.to_be_bytes());
        let (id, response) = parse_response(&packet[4..]).unwrap();
        assert_eq!(id, 3);
        assert!(matches!(response, Response::Handle(ref bytes) if bytes == &7u32.to_be_bytes()));
    }

    #[test]
    fn test_parse_rejects_unknown_reply() {
        let mut builder = proto::Builder::new(proto::SSH_FXP_NAME);
        builder.u32(1).u32(0);
        assert!(parse_response(&builder.finish()[4..]).is_err());
    }
}

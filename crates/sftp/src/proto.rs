//! SFTP version 3 wire format: framing, the message types we speak, and
//! builders for the packets both sides send.
//!
//! Only the subset needed for content-addressed transfer is implemented;
//! the server answers everything else with `SSH_FX_OP_UNSUPPORTED`.

use crate::error::{ErrorKind, Result};

/// Protocol version negotiated in INIT/VERSION.
pub const VERSION: u32 = 3;

// Message types (client → server unless noted).
pub const SSH_FXP_INIT: u8 = 1;
pub const SSH_FXP_VERSION: u8 = 2; // server → client
pub const SSH_FXP_OPEN: u8 = 3;
pub const SSH_FXP_CLOSE: u8 = 4;
pub const SSH_FXP_READ: u8 = 5;
pub const SSH_FXP_WRITE: u8 = 6;
pub const SSH_FXP_LSTAT: u8 = 7;
pub const SSH_FXP_FSTAT: u8 = 8;
pub const SSH_FXP_SETSTAT: u8 = 9;
pub const SSH_FXP_FSETSTAT: u8 = 10;
pub const SSH_FXP_OPENDIR: u8 = 11;
pub const SSH_FXP_READDIR: u8 = 12;
pub const SSH_FXP_REMOVE: u8 = 13;
pub const SSH_FXP_MKDIR: u8 = 14;
pub const SSH_FXP_RMDIR: u8 = 15;
pub const SSH_FXP_REALPATH: u8 = 16;
pub const SSH_FXP_STAT: u8 = 17;
pub const SSH_FXP_RENAME: u8 = 18;
pub const SSH_FXP_READLINK: u8 = 19;
pub const SSH_FXP_SYMLINK: u8 = 20;
pub const SSH_FXP_STATUS: u8 = 101; // server → client
pub const SSH_FXP_HANDLE: u8 = 102; // server → client
pub const SSH_FXP_DATA: u8 = 103; // server → client
pub const SSH_FXP_NAME: u8 = 104; // server → client
pub const SSH_FXP_ATTRS: u8 = 105; // server → client
pub const SSH_FXP_EXTENDED: u8 = 200;

// Status codes.
pub const SSH_FX_OK: u32 = 0;
pub const SSH_FX_EOF: u32 = 1;
pub const SSH_FX_NO_SUCH_FILE: u32 = 2;
pub const SSH_FX_PERMISSION_DENIED: u32 = 3;
pub const SSH_FX_FAILURE: u32 = 4;
pub const SSH_FX_BAD_MESSAGE: u32 = 5;
pub const SSH_FX_OP_UNSUPPORTED: u32 = 8;

// Open pflags.
pub const SSH_FXF_READ: u32 = 0x0000_0001;
pub const SSH_FXF_WRITE: u32 = 0x0000_0002;
pub const SSH_FXF_APPEND: u32 = 0x0000_0004;
pub const SSH_FXF_CREAT: u32 = 0x0000_0008;
pub const SSH_FXF_TRUNC: u32 = 0x0000_0010;
pub const SSH_FXF_EXCL: u32 = 0x0000_0020;

// Attr flags.
pub const SSH_FILEXFER_ATTR_SIZE: u32 = 0x0000_0001;
pub const SSH_FILEXFER_ATTR_UIDGID: u32 = 0x0000_0002;
pub const SSH_FILEXFER_ATTR_PERMISSIONS: u32 = 0x0000_0004;
pub const SSH_FILEXFER_ATTR_ACMODTIME: u32 = 0x0000_0008;

const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;

/// v3 file attributes. Only size and permissions are ever populated; no
/// user, group or timestamp information crosses the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Attrs {
    pub size: Option<u64>,
    pub permissions: Option<u32>,
}

impl Attrs {
    pub fn regular(size: u64) -> Self {
        Self { size: Some(size), permissions: Some(S_IFREG | 0o644) }
    }

    pub fn directory() -> Self {
        Self { size: None, permissions: Some(S_IFDIR | 0o755) }
    }

    pub fn is_directory(&self) -> bool {
        self.permissions.is_some_and(|mode| mode & S_IFDIR != 0)
    }

    fn encode(&self, builder: &mut Builder) {
        let mut flags = 0;
        if self.size.is_some() {
            flags |= SSH_FILEXFER_ATTR_SIZE;
        }
        if self.permissions.is_some() {
            flags |= SSH_FILEXFER_ATTR_PERMISSIONS;
        }
        builder.u32(flags);
        if let Some(size) = self.size {
            builder.u64(size);
        }
        if let Some(permissions) = self.permissions {
            builder.u32(permissions);
        }
    }

    pub fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let flags = reader.u32()?;
        let mut attrs = Self::default();
        if flags & SSH_FILEXFER_ATTR_SIZE != 0 {
            attrs.size = Some(reader.u64()?);
        }
        if flags & SSH_FILEXFER_ATTR_UIDGID != 0 {
            reader.u32()?;
            reader.u32()?;
        }
        if flags & SSH_FILEXFER_ATTR_PERMISSIONS != 0 {
            attrs.permissions = Some(reader.u32()?);
        }
        if flags & SSH_FILEXFER_ATTR_ACMODTIME != 0 {
            reader.u32()?;
            reader.u32()?;
        }
        Ok(attrs)
    }
}

/// Accumulates raw channel bytes and yields complete packets (length prefix
/// stripped).
#[derive(Default)]
pub struct FrameBuffer {
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.data.len() < 4 {
            return None;
        }
        let len = u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]) as usize;
        if self.data.len() < 4 + len {
            return None;
        }
        let frame = self.data[4..4 + len].to_vec();
        self.data.drain(..4 + len);
        Some(frame)
    }
}

/// Cursor over one packet's payload.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.buf.len() {
            exn::bail!(ErrorKind::Protocol("truncated packet".into()))
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(out))
    }

    /// A length-prefixed byte string.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub fn string(&mut self) -> Result<String> {
        let raw = self.bytes()?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| ErrorKind::Protocol("non-utf8 string".into()).into())
    }
}

/// Builds one length-prefixed packet.
pub struct Builder {
    buf: Vec<u8>,
}

impl Builder {
    pub fn new(packet_type: u8) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&[0, 0, 0, 0]);
        buf.push(packet_type);
        Self { buf }
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.u32(value.len() as u32);
        self.buf.extend_from_slice(value);
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        let len = (self.buf.len() - 4) as u32;
        self.buf[..4].copy_from_slice(&len.to_be_bytes());
        self.buf
    }
}

// Packet constructors shared by client and server.

pub fn init() -> Vec<u8> {
    let mut builder = Builder::new(SSH_FXP_INIT);
    builder.u32(VERSION);
    builder.finish()
}

pub fn version() -> Vec<u8> {
    let mut builder = Builder::new(SSH_FXP_VERSION);
    builder.u32(VERSION);
    builder.finish()
}

pub fn status(id: u32, code: u32, message: &str) -> Vec<u8> {
    let mut builder = Builder::new(SSH_FXP_STATUS);
    builder.u32(id).u32(code).bytes(message.as_bytes()).bytes(b"en");
    builder.finish()
}

pub fn handle(id: u32, handle: &[u8]) -> Vec<u8> {
    let mut builder = Builder::new(SSH_FXP_HANDLE);
    builder.u32(id).bytes(handle);
    builder.finish()
}

pub fn data(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut builder = Builder::new(SSH_FXP_DATA);
    builder.u32(id).bytes(payload);
    builder.finish()
}

pub fn attrs_reply(id: u32, attrs: &Attrs) -> Vec<u8> {
    let mut builder = Builder::new(SSH_FXP_ATTRS);
    builder.u32(id);
    attrs.encode(&mut builder);
    builder.finish()
}

pub fn open(id: u32, path: &str, pflags: u32) -> Vec<u8> {
    let mut builder = Builder::new(SSH_FXP_OPEN);
    builder.u32(id).bytes(path.as_bytes()).u32(pflags);
    Attrs::default().encode(&mut builder);
    builder.finish()
}

pub fn close(id: u32, file_handle: &[u8]) -> Vec<u8> {
    let mut builder = Builder::new(SSH_FXP_CLOSE);
    builder.u32(id).bytes(file_handle);
    builder.finish()
}

pub fn read(id: u32, file_handle: &[u8], offset: u64, len: u32) -> Vec<u8> {
    let mut builder = Builder::new(SSH_FXP_READ);
    builder.u32(id).bytes(file_handle).u64(offset).u32(len);
    builder.finish()
}

pub fn write(id: u32, file_handle: &[u8], offset: u64, payload: &[u8]) -> Vec<u8> {
    let mut builder = Builder::new(SSH_FXP_WRITE);
    builder.u32(id).bytes(file_handle).u64(offset).bytes(payload);
    builder.finish()
}

pub fn stat(id: u32, path: &str) -> Vec<u8> {
    let mut builder = Builder::new(SSH_FXP_STAT);
    builder.u32(id).bytes(path.as_bytes());
    builder.finish()
}

pub fn mkdir(id: u32, path: &str) -> Vec<u8> {
    let mut builder = Builder::new(SSH_FXP_MKDIR);
    builder.u32(id).bytes(path.as_bytes());
    Attrs::default().encode(&mut builder);
    builder.finish()
}

/// The last path segment: the only part of a client-supplied path the
/// server interprets.
pub fn trailing_segment(path: &[u8]) -> &[u8] {
    path.rsplit(|byte| *byte == b'/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_buffer_reassembles_split_packets() {
        let packet = status(7, SSH_FX_OK, "done");
        let mut frames = FrameBuffer::default();
        frames.push(&packet[..3]);
        assert!(frames.next_frame().is_none());
        frames.push(&packet[3..]);
        let frame = frames.next_frame().unwrap();
        assert_eq!(frame[0], SSH_FXP_STATUS);
        assert!(frames.next_frame().is_none());
    }

    #[test]
    fn test_frame_buffer_yields_back_to_back_packets() {
        let mut stream = version();
        stream.extend(status(1, SSH_FX_EOF, ""));
        let mut frames = FrameBuffer::default();
        frames.push(&stream);
        assert_eq!(frames.next_frame().unwrap()[0], SSH_FXP_VERSION);
        assert_eq!(frames.next_frame().unwrap()[0], SSH_FXP_STATUS);
    }

    #[test]
    fn test_status_roundtrip() {
        let packet = status(42, SSH_FX_NO_SUCH_FILE, "missing");
        let mut frames = FrameBuffer::default();
        frames.push(&packet);
        let frame = frames.next_frame().unwrap();
        let mut reader = Reader::new(&frame);
        assert_eq!(reader.u8().unwrap(), SSH_FXP_STATUS);
        assert_eq!(reader.u32().unwrap(), 42);
        assert_eq!(reader.u32().unwrap(), SSH_FX_NO_SUCH_FILE);
        assert_eq!(reader.string().unwrap(), "missing");
    }

    #[test]
    fn test_attrs_roundtrip() {
        let attrs = Attrs::regular(1234);
        let mut builder = Builder::new(SSH_FXP_ATTRS);
        attrs.encode(&mut builder);
        let packet = builder.finish();
        let mut reader = Reader::new(&packet[5..]);
        let decoded = Attrs::decode(&mut reader).unwrap();
        assert_eq!(decoded, attrs);
        assert!(!decoded.is_directory());
        assert!(Attrs::directory().is_directory());
    }

    #[test]
    fn test_attrs_decode_skips_uidgid_and_times() {
        let mut builder = Builder::new(SSH_FXP_ATTRS);
        builder
            .u32(SSH_FILEXFER_ATTR_SIZE | SSH_FILEXFER_ATTR_UIDGID | SSH_FILEXFER_ATTR_ACMODTIME)
            .u64(99)
            .u32(1000)
            .u32(1000)
            .u32(111)
            .u32(222);
        let packet = builder.finish();
        let mut reader = Reader::new(&packet[5..]);
        let decoded = Attrs::decode(&mut reader).unwrap();
        assert_eq!(decoded.size, Some(99));
        assert_eq!(decoded.permissions, None);
    }

    #[test]
    fn test_reader_rejects_truncation() {
        let mut reader = Reader::new(&[0, 0]);
        assert!(reader.u32().is_err());
    }

    #[test]
    fn test_trailing_segment() {
        assert_eq!(trailing_segment(b"/a/b/key"), b"key");
        assert_eq!(trailing_segment(b"key"), b"key");
        assert_eq!(trailing_segment(b"a/"), b"");
    }
}

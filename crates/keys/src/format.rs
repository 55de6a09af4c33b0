//! Key schemes: how payload bytes become a canonical [`FileKey`].
//!
//! Every scheme encodes the payload size in decimal and a lowercase hex
//! digest, separated by `--`, with an optional trailing `.<extension>`.
//! Parsing is strict: a key either matches its scheme's canonical form
//! exactly or it is not a key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ErrorKind, Result};
use crate::key::FileKey;

const CHUNK_SIZE: usize = 64 * 1024;

/// A file-key scheme.
///
/// The reference scheme is [`Sha256e`](KeyFormat::Sha256e)
/// (`SHA256E-s<size>--<sha256-hex>[.<ext>]`, git-annex compatible).
/// [`Blake3e`](KeyFormat::Blake3e) is the same shape over a BLAKE3 digest.
///
/// The variant name serializes lowercase in repository descriptors
/// (`"key_format": "sha256e"`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFormat {
    #[default]
    Sha256e,
    Blake3e,
}

impl KeyFormat {
    fn prefix(self) -> &'static str {
        match self {
            Self::Sha256e => "SHA256E",
            Self::Blake3e => "BLAKE3E",
        }
    }

    fn digest_hex_len(self) -> usize {
        // Both SHA-256 and BLAKE3 digest to 32 bytes.
        64
    }

    fn assemble(self, size: u64, digest_hex: &str, extension: Option<&str>) -> FileKey {
        let extension = extension.filter(|ext| !ext.is_empty());
        match extension {
            Some(ext) => FileKey::from_raw(format!("{}-s{size}--{digest_hex}.{ext}", self.prefix())),
            None => FileKey::from_raw(format!("{}-s{size}--{digest_hex}", self.prefix())),
        }
    }

    /// Compute the key for an in-memory payload.
    ///
    /// Pure: the same bytes and extension always produce the same key.
    pub fn from_bytes(self, data: &[u8], extension: Option<&str>) -> FileKey {
        let digest_hex = match self {
            Self::Sha256e => hex::encode(Sha256::digest(data)),
            Self::Blake3e => blake3::hash(data).to_hex().to_string(),
        };
        self.assemble(data.len() as u64, &digest_hex, extension)
    }

    /// Compute the key by reading a stream to EOF.
    ///
    /// Hashing is incremental; the payload is never buffered whole. The
    /// stream is left at EOF: callers that need the bytes again must reopen
    /// their source.
    pub async fn from_stream<R>(self, reader: &mut R, extension: Option<&str>) -> Result<FileKey>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut size: u64 = 0;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let digest_hex = match self {
            Self::Sha256e => {
                let mut hasher = Sha256::new();
                loop {
                    let n = reader.read(&mut buf).await.map_err(ErrorKind::Io)?;
                    if n == 0 {
                        break;
                    }
                    size += n as u64;
                    hasher.update(&buf[..n]);
                }
                hex::encode(hasher.finalize())
            }
            Self::Blake3e => {
                let mut hasher = blake3::Hasher::new();
                loop {
                    let n = reader.read(&mut buf).await.map_err(ErrorKind::Io)?;
                    if n == 0 {
                        break;
                    }
                    size += n as u64;
                    hasher.update(&buf[..n]);
                }
                hasher.finalize().to_hex().to_string()
            }
        };
        Ok(self.assemble(size, &digest_hex, extension))
    }

    /// Compute the key for a file on disk.
    ///
    /// When no explicit extension is given, the trailing extension of the
    /// filename is used, lower-cased. An explicit extension is used verbatim.
    pub async fn from_file(self, path: &Path, extension: Option<&str>) -> Result<FileKey> {
        let derived;
        let extension = match extension {
            Some(ext) => Some(ext),
            None => {
                derived = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.to_ascii_lowercase());
                derived.as_deref()
            }
        };
        let mut file = tokio::fs::File::open(path).await.map_err(ErrorKind::Io)?;
        self.from_stream(&mut file, extension).await
    }

    /// Parse untrusted input as a key of this scheme.
    ///
    /// Returns `Some` iff the input matches the canonical form exactly:
    /// scheme prefix, `-s`, decimal size, `--`, lowercase hex digest of the
    /// scheme's length, optionally `.` and a non-empty extension.
    pub fn try_parse(self, input: &[u8]) -> Option<FileKey> {
        let text = std::str::from_utf8(input).ok()?;
        let rest = text.strip_prefix(self.prefix())?.strip_prefix("-s")?;
        let (size, rest) = rest.split_once("--")?;
        if size.is_empty() || !size.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let (digest, extension) = match rest.split_once('.') {
            Some((digest, ext)) => (digest, Some(ext)),
            None => (rest, None),
        };
        if digest.len() != self.digest_hex_len() {
            return None;
        }
        if !digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return None;
        }
        if let Some(ext) = extension {
            if ext.is_empty() || ext.bytes().any(|b| b == b'/' || !b.is_ascii_graphic()) {
                return None;
            }
        }
        Some(FileKey::from_raw(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const HELLO_KEY: &str =
        "SHA256E-s5--2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824.txt";

    #[test]
    fn test_from_bytes_reference_vector() {
        let key = KeyFormat::Sha256e.from_bytes(b"hello", Some("txt"));
        assert_eq!(key.as_str(), HELLO_KEY);
    }

    #[test]
    fn test_from_bytes_without_extension() {
        let key = KeyFormat::Sha256e.from_bytes(b"hello", None);
        assert_eq!(
            key.as_str(),
            "SHA256E-s5--2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        // An empty extension is the same as no extension.
        let key = KeyFormat::Sha256e.from_bytes(b"hello", Some(""));
        assert_eq!(key.extension(), None);
    }

    #[test]
    fn test_parse_roundtrip() {
        let key = KeyFormat::Sha256e.from_bytes(b"hello", Some("txt"));
        let parsed = KeyFormat::Sha256e.try_parse(key.as_bytes()).unwrap();
        assert_eq!(parsed, key);
    }

    #[rstest]
    #[case::wrong_prefix(b"SHA256-s5--2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")]
    #[case::one_dash(b"SHA256E-s5-2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")]
    #[case::size_not_decimal(b"SHA256E-sx--2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")]
    #[case::missing_size(b"SHA256E-s--2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")]
    #[case::digest_too_short(b"SHA256E-s5--2cf24dba")]
    #[case::digest_uppercase(b"SHA256E-s5--2CF24DBA5FB0A30E26E83B2AC5B9E29E1B161E5C1FA7425E73043362938B9824")]
    #[case::empty_extension(b"SHA256E-s5--2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824.")]
    #[case::not_a_key(b"hello.txt")]
    fn test_parse_rejects(#[case] input: &[u8]) {
        assert_eq!(KeyFormat::Sha256e.try_parse(input), None);
    }

    #[test]
    fn test_parse_is_scheme_specific() {
        let key = KeyFormat::Blake3e.from_bytes(b"hello", None);
        assert!(KeyFormat::Sha256e.try_parse(key.as_bytes()).is_none());
        assert!(KeyFormat::Blake3e.try_parse(key.as_bytes()).is_some());
    }

    #[test]
    fn test_blake3_shape() {
        let key = KeyFormat::Blake3e.from_bytes(b"hello", Some("bin"));
        assert!(key.as_str().starts_with("BLAKE3E-s5--"));
        assert!(key.as_str().ends_with(".bin"));
        assert_eq!(KeyFormat::Blake3e.try_parse(key.as_bytes()), Some(key));
    }

    #[tokio::test]
    async fn test_from_stream_matches_from_bytes() {
        let data = b"some larger payload".repeat(10_000);
        let mut cursor = std::io::Cursor::new(data.clone());
        let streamed = KeyFormat::Sha256e.from_stream(&mut cursor, Some("bin")).await.unwrap();
        assert_eq!(streamed, KeyFormat::Sha256e.from_bytes(&data, Some("bin")));
    }

    #[tokio::test]
    async fn test_from_file_derives_lowercased_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.TXT");
        tokio::fs::write(&path, b"hello").await.unwrap();
        let key = KeyFormat::Sha256e.from_file(&path, None).await.unwrap();
        assert_eq!(key.as_str(), HELLO_KEY);
        // Explicit extension wins over the filename.
        let key = KeyFormat::Sha256e.from_file(&path, Some("dat")).await.unwrap();
        assert_eq!(key.extension(), Some("dat"));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&KeyFormat::Sha256e).unwrap(), "\"sha256e\"");
        let parsed: KeyFormat = serde_json::from_str("\"blake3e\"").unwrap();
        assert_eq!(parsed, KeyFormat::Blake3e);
    }
}

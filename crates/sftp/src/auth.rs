//! Public-key authentication for the SFTP server.
//!
//! The set of authorized keys is loaded once at startup from a directory of
//! `*.pub` files in OpenSSH format. Keys are compared by fingerprint:
//! SHA256 over the raw key blob, base64 without padding, matching the
//! familiar `SHA256:…` notation.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use russh_keys::PublicKeyBase64;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{ErrorKind, Result};

/// Fingerprint of a raw public-key blob.
pub fn fingerprint(blob: &[u8]) -> String {
    format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(blob)))
}

/// The fingerprints the server will accept.
pub struct AuthorizedKeys {
    fingerprints: HashSet<String>,
}

impl AuthorizedKeys {
    /// Load every parseable `*.pub` file under `dir`. Unparseable files are
    /// skipped with a warning; an empty directory yields a server that
    /// rejects everyone.
    pub async fn load(dir: &Path) -> Result<Self> {
        let mut fingerprints = HashSet::new();
        let mut entries = tokio::fs::read_dir(dir).await.map_err(ErrorKind::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(ErrorKind::Io)? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("pub") {
                continue;
            }
            let contents = tokio::fs::read_to_string(&path).await.map_err(ErrorKind::Io)?;
            match parse_openssh_public_key(&contents) {
                Some(blob) => {
                    let print = fingerprint(&blob);
                    debug!(key = %path.display(), fingerprint = %print, "authorized key loaded");
                    if !fingerprints.insert(print) {
                        warn!(key = %path.display(), "duplicate authorized key");
                    }
                }
                None => warn!(key = %path.display(), "skipping unparseable public key"),
            }
        }
        if fingerprints.is_empty() {
            warn!(dir = %dir.display(), "no authorized keys loaded; all clients will be rejected");
        }
        Ok(Self { fingerprints })
    }

    #[cfg(test)]
    pub(crate) fn from_fingerprints(fingerprints: impl IntoIterator<Item = String>) -> Self {
        Self { fingerprints: fingerprints.into_iter().collect() }
    }

    /// Whether a connecting client's key is authorized.
    pub fn contains(&self, key: &russh_keys::key::PublicKey) -> bool {
        self.fingerprints.contains(&fingerprint(&key.public_key_bytes()))
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

/// Extract the raw key blob from an OpenSSH `type base64 [comment]` line.
fn parse_openssh_public_key(line: &str) -> Option<Vec<u8>> {
    let encoded = line.split_whitespace().nth(1)?;
    STANDARD.decode(encoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let blob = b"not a real key blob";
        assert_eq!(fingerprint(blob), fingerprint(blob));
        assert!(fingerprint(blob).starts_with("SHA256:"));
        assert!(!fingerprint(blob).ends_with('='));
    }

    #[test]
    fn test_parse_openssh_public_key() {
        let encoded = STANDARD.encode(b"blob-bytes");
        let line = format!("ssh-ed25519 {encoded} someone@host");
        assert_eq!(parse_openssh_public_key(&line).unwrap(), b"blob-bytes");
        assert!(parse_openssh_public_key("garbage").is_none());
    }

    #[tokio::test]
    async fn test_load_skips_non_pub_and_unparseable_files() {
        let dir = tempfile::tempdir().unwrap();
        let encoded = STANDARD.encode(b"the-key-blob");
        tokio::fs::write(dir.path().join("good.pub"), format!("ssh-ed25519 {encoded} a@b"))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("junk.pub"), "not a key").await.unwrap();
        tokio::fs::write(dir.path().join("README"), "ignored").await.unwrap();

        let keys = AuthorizedKeys::load(dir.path()).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.fingerprints.contains(&fingerprint(b"the-key-blob")));
    }
}

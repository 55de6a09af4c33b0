//! Locator paths: where a key's payload lives inside path-based backends.
//!
//! The locator hash is MD5 over the key bytes. It spreads keys across a
//! two-level directory fan-out and is kept for compatibility with existing
//! annex layouts; it addresses *keys*, not content, so its cryptographic
//! weakness is irrelevant here.

use std::path::PathBuf;
use stowage_keys::FileKey;

/// Relative path for a key: `<md5[0:3]>/<md5[3:6]>/<key>`.
pub fn key_path(key: &FileKey) -> PathBuf {
    let digest = format!("{:x}", md5::compute(key.as_bytes()));
    PathBuf::from(&digest[..3]).join(&digest[3..6]).join(key.as_str())
}

/// Relative path for a key in the deprecated layout, which nested the
/// payload inside an extra directory named after the key:
/// `<md5[0:3]>/<md5[3:6]>/<key>/<key>`.
///
/// Older annex trees used this layout; readers fall back to it.
pub fn legacy_key_path(key: &FileKey) -> PathBuf {
    let digest = format!("{:x}", md5::compute(key.as_bytes()));
    PathBuf::from(&digest[..3])
        .join(&digest[3..6])
        .join(key.as_str())
        .join(key.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_KEY: &str =
        "SHA256E-s5--2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824.txt";

    #[test]
    fn test_key_path_reference_vector() {
        let key = FileKey::from_raw(HELLO_KEY);
        let path = key_path(&key);
        assert_eq!(path, PathBuf::from("091").join("de9").join(HELLO_KEY));
    }

    #[test]
    fn test_legacy_key_path_nests_key_directory() {
        let key = FileKey::from_raw(HELLO_KEY);
        let path = legacy_key_path(&key);
        assert_eq!(
            path,
            PathBuf::from("091").join("de9").join(HELLO_KEY).join(HELLO_KEY)
        );
    }
}

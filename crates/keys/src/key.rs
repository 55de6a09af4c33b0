use std::fmt;

/// Canonical identifier for a file's contents under a chosen key format.
///
/// A `FileKey` wraps the canonical ASCII byte string (for the reference
/// format: `SHA256E-s<size>--<sha256-hex>[.<extension>]`). Equality, hashing
/// and ordering are byte-exact over that string.
///
/// Keys are produced by [`KeyFormat`](crate::KeyFormat): either computed
/// from payload bytes or strictly parsed from untrusted input. Code that
/// round-trips keys through storage it already wrote (the catalog, a
/// filestore) may rebuild them with [`FileKey::from_raw`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileKey(Box<str>);

impl FileKey {
    /// Wrap a string that is already a canonical key.
    ///
    /// No validation is performed; use
    /// [`KeyFormat::try_parse`](crate::KeyFormat::try_parse) for input that
    /// did not originate from this process or its own catalog.
    pub fn from_raw(canonical: impl Into<String>) -> Self {
        Self(canonical.into().into_boxed_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// The extension segment of the key, without the leading dot.
    ///
    /// Digest hex never contains a dot, so the first dot (if any) starts the
    /// extension.
    pub fn extension(&self) -> Option<&str> {
        self.0.split_once('.').map(|(_, ext)| ext)
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension() {
        let key = FileKey::from_raw("SHA256E-s5--2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824.txt");
        assert_eq!(key.extension(), Some("txt"));
        let bare = FileKey::from_raw("SHA256E-s5--2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
        assert_eq!(bare.extension(), None);
    }

    #[test]
    fn test_equality_is_byte_exact() {
        let a = FileKey::from_raw("SHA256E-s1--aa");
        let b = FileKey::from_raw("SHA256E-s1--aa");
        let c = FileKey::from_raw("SHA256E-s1--ab");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

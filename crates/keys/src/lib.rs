//! File-key computation and parsing.
//!
//! A *file key* is the canonical identifier for a file's contents: an ASCII
//! byte string encoding the payload size, a digest of the bytes, and an
//! optional extension carried over from the source filename. Two payloads
//! that differ produce different keys; the same payload always produces the
//! same key, no matter which repository computed it.
//!
//! [`KeyFormat`] is the sum type over supported key schemes. The reference
//! scheme is [`KeyFormat::Sha256e`]; other schemes can be added as variants.

mod error;
mod format;
mod key;

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::format::KeyFormat;
pub use crate::key::FileKey;

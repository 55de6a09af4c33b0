//! Filestore error types, in the `exn` error-tree style.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;
use stowage_keys::FileKey;

/// A filestore error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for filestore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong
/// internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No payload is stored under the key
    #[display("key not found: {_0}")]
    NotFound(#[error(not(source))] FileKey),
    /// A payload is already stored under the key; overwrites are refused
    #[display("key already exists: {_0}")]
    AlreadyExists(#[error(not(source))] FileKey),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// A backend file or directory is missing or malformed
    #[display("invalid store path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Key computation failed while hashing source bytes
    #[display("key computation failed: {_0}")]
    Key(#[error(not(source))] String),
    /// Backend-specific error (embedded database, archive packing, …)
    #[display("backend error: {_0}")]
    Backend(#[error(not(source))] String),
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Convert a key-computation error, preserving its `Exn` frame as a
    /// child in the error tree.
    #[track_caller]
    pub fn key(err: stowage_keys::Error) -> Error {
        let message = err.to_string();
        err.raise(ErrorKind::Key(message))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Backend(_))
    }
}

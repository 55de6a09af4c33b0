use derive_more::{Display, Error};
use std::io::Error as IoError;
use stowage_keys::FileKey;

/// An SFTP error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for SFTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories for the SFTP client and server.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// SSH transport or session failure
    #[display("ssh error: {_0}")]
    Ssh(#[error(not(source))] String),
    /// The peer spoke something that is not the expected SFTP subset
    #[display("sftp protocol error: {_0}")]
    Protocol(#[error(not(source))] String),
    /// The peer rejected our public key
    #[display("authentication failed")]
    AuthFailed,
    /// An upload's bytes do not hash to the key it was declared under
    #[display("declared key {declared} does not match computed key {computed}")]
    KeyMismatch { declared: FileKey, computed: FileKey },
    /// The server answered a request with a non-OK status
    #[display("remote error (status {code}): {message}")]
    Remote { code: u32, message: String },
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl From<russh::Error> for ErrorKind {
    fn from(err: russh::Error) -> Self {
        Self::Ssh(err.to_string())
    }
}

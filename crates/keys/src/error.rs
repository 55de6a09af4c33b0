use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A key-computation error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for key operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure categories for key computation.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Reading the source bytes failed
    #[display("I/O error: {_0}")]
    Io(IoError),
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories for configuration loading.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Reading or writing a descriptor file failed
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// A descriptor file is not valid JSON for its type
    #[display("malformed descriptor: {}", _0.display())]
    Malformed(#[error(not(source))] PathBuf),
    /// A descriptor's `name` field does not match its file name
    #[display("descriptor name mismatch in {}", _0.display())]
    NameMismatch(#[error(not(source))] PathBuf),
    /// No descriptor with the requested name exists
    #[display("no such descriptor: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The application config could not be assembled
    #[display("invalid application config")]
    Config,
    /// Opening a configured filestore failed
    #[display("could not open filestore")]
    Filestore,
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

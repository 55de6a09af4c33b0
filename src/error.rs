use derive_more::{Display, Error};

/// A CLI error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for CLI commands.
pub type Result<T> = std::result::Result<T, Error>;

/// Which subsystem a command failed in; the cause chain carries the
/// specifics (key, row, path).
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("config")]
    Config,
    #[display("filestore")]
    Store,
    #[display("catalog")]
    Catalog,
    #[display("sync")]
    Sync,
    #[display("sftp")]
    Sftp,
    #[display("i/o")]
    Io,
    #[display("{_0}")]
    Usage(#[error(not(source))] String),
}

/// One line: category, then the cause chain innermost-to-outermost.
pub fn render(err: &Error) -> String {
    let mut line = err.to_string();
    let mut source = std::error::Error::source(err.frame());
    while let Some(cause) = source {
        line.push_str(": ");
        line.push_str(&cause.to_string());
        source = cause.source();
    }
    line
}

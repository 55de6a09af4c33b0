use derive_more::{Display, Error};
use stowage_keys::FileKey;

/// A sync error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories for synchronization.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A catalog operation (branch, merge, diff, flush) failed
    #[display("catalog error during sync")]
    Catalog,
    /// A filestore read or write failed
    #[display("filestore error during sync")]
    Store,
    /// The same key columns map to different file keys on the two peers.
    /// Content addressing makes this unreachable through this tool; it
    /// means a catalog was edited out-of-band. Fatal, never retried.
    #[display("modified conflict: {_0} differs between the repositories")]
    ModifiedConflict(#[error(not(source))] FileKey),
    /// The diff view returned a row shape the schema does not describe
    #[display("unexpected diff row: {_0}")]
    Diff(#[error(not(source))] &'static str),
}

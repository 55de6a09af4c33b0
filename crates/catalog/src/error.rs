use derive_more::{Display, Error};

/// A catalog error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories for catalog operations.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Query or connection failure in the catalog engine
    #[display("catalog database error")]
    Database,
    /// The catalog sql-server child process could not be started or reached
    #[display("could not start the catalog sql-server: {_0}")]
    Spawn(#[error(not(source))] String),
    /// Branch creation, checkout, merge or pull failed
    #[display("branch operation failed: {_0}")]
    Branch(#[error(not(source))] String),
    /// A registered flush hook reported a failure
    #[display("flush hook failed: {_0}")]
    Hook(#[error(not(source))] String),
    /// A row came back in a shape the schema does not describe
    #[display("row decode failed: {_0}")]
    Decode(#[error(not(source))] &'static str),
}

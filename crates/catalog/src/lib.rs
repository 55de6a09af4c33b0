//! The version-controlled catalog.
//!
//! For every `(repository, dataset)` pair the catalog engine holds a branch
//! named `{repo-uuid}-{dataset}` whose tip records exactly which
//! `(key-columns → file-key)` rows that repository asserts it holds. The
//! engine is a Dolt `sql-server` spoken to over the MySQL protocol; any
//! engine with branches, `HASHOF()` and per-table commit-diff views would
//! do.
//!
//! # Architecture
//! - [`Dolt`]: one connection, branch switching, batched writes, commits.
//! - [`FileTable`]: per-table write buffer keyed by source repository;
//!   flushing writes the catalog first, then runs registered flush hooks
//!   (which move bytes), then clears. That order is what makes a kill at
//!   any point recoverable.
//! - [`Dataset`]: the set of file tables versioned together.

pub mod dataset;
pub mod db;
pub mod error;
pub mod schema;
pub mod table;

pub use crate::dataset::Dataset;
pub use crate::db::{Dolt, DoltHandle, DoltSettings};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::schema::{
    DatasetSchema, TableFilter, TableRow, TableSchema, repo_branch, union_branch,
};
pub use crate::table::{FileTable, FlushHook};

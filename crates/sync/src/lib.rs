//! Synchronization between repositories.
//!
//! Sync is catalog-driven: the set of files to move from repository `A` to
//! repository `B` for a dataset is the commit diff between `B`'s branch and
//! the union of both branches. The union branch is created lazily, only
//! ever accumulates rows, and is reused by every later sync between the
//! same pair.
//!
//! Work proceeds page by page (bounded by the batch size); each page's
//! bytes are streamed between filestores before the destination's catalog
//! rows are flushed, so an interrupted sync never records a file the
//! destination does not hold.

pub mod engine;
pub mod error;

pub use crate::engine::{SyncOutcome, move_table, pull_dataset, push_dataset, sync_dataset};
pub use crate::error::{Error, ErrorKind, Result};

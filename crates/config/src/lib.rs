//! Configuration: application settings and the on-disk descriptor registry.
//!
//! Two layers:
//! - [`AppConfig`]: process-wide settings (data directory, catalog engine,
//!   SSH client keys), merged from defaults, an optional JSON config file
//!   and `STOWAGE_*` environment variables.
//! - [`Registry`]: named JSON descriptors for repositories and datasets,
//!   each stored as `<name>.<type-extension>` under the descriptors
//!   directory and cached once loaded. [`Registry::context`] snapshots the
//!   caches and restores them on drop, so tests can load fixtures without
//!   leaking state.

pub mod app;
pub mod error;
pub mod registry;
pub mod repo;
pub mod spec;

pub use crate::app::{AppConfig, DoltConfig, SshConfig};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::registry::{Descriptor, Registry, RegistryContext, Store};
pub use crate::repo::Repo;
pub use crate::spec::{FilestoreSpec, RepoSpec};

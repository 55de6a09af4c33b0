//! SFTP access to filestores.
//!
//! SFTP is used here for historical compatibility: the first filestore was a
//! directory tree, and a stock SFTP server pointed at that tree was a valid
//! remote. This crate keeps that property in both directions:
//!
//! - [`server`] exposes any filestore over a *minimal* SFTP v3 subset
//!   (open/read/write/close/stat, no-op mkdir/rmdir, everything else
//!   unsupported), verifying on every upload that the declared key matches
//!   the bytes actually received.
//! - [`SftpStore`] is a filestore backed by an SFTP peer. It addresses files
//!   with the same locator-hash layout as the directory backend, so it works
//!   against either this crate's server or a plain SFTP server over an annex
//!   root.
//!
//! A single SFTP connection transfers one file at a time.

pub mod auth;
pub mod client;
pub mod error;
pub mod proto;
pub mod server;
mod store;

pub use crate::client::SftpClient;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::server::{SftpServer, serve};
pub use crate::store::SftpStore;

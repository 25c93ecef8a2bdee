//! Remote filesystem operations for SMB shares: directory listing, chunked
//! upload and download, single and recursive deletion, and rename.
//!
//! The wire protocol is left to a service implementing
//! [`service::Connector`]. A [`Session`] binds such a service to one
//! identity and exposes the operations a file browser needs.

#[macro_use]
extern crate log;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate async_trait;

/// Identity and authentication callback
pub mod auth;
/// Client side
pub mod client;
mod error;
/// Address construction
pub mod locator;
/// In-memory service
pub mod memory;
/// Service over locally mounted shares
pub mod mount;
/// Service primitives
pub mod service;

pub use auth::{CredentialContext, Credentials};
pub use client::{RemoteEntry, Session, SessionConfig};
pub use error::{Error, Op, RemoteResult, Status};
pub use locator::{build_url, RemoteLocator};

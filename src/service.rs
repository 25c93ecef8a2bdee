//! Primitives consumed from the underlying remote filesystem service.
//!
//! Everything is keyed by an address string built with
//! [`build_url`](crate::locator::build_url). A [`Connector`] registers the
//! authentication callback and yields a [`Connection`]; the connection
//! carries no other state between calls.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{auth::Authenticator, error::Status};

/// errno values reported by the bundled services
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const EBADF: i32 = 9;
    pub const EACCES: i32 = 13;
    pub const EEXIST: i32 = 17;
    pub const EXDEV: i32 = 18;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const ENOTEMPTY: i32 = 39;
    pub const ETIMEDOUT: i32 = 110;
}

/// Opening flags passed to [`Connection::open`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFlags(u32);

bitflags! {
    impl OpenFlags: u32 {
        const READ = 0x0000_0001;
        const WRITE = 0x0000_0002;
        const APPEND = 0x0000_0004;
        const CREATE = 0x0000_0008;
        const TRUNCATE = 0x0000_0010;
        const EXCLUDE = 0x0000_0020;
    }
}

/// Opaque file or directory handle issued by a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u32);

/// Type tag reported for each directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Workgroup,
    Server,
    FileShare,
    PrinterShare,
    Dir,
    File,
    Link,
}

/// Raw entry as yielded by [`Connection::readdir`], pseudo-entries included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn new<N: Into<String>>(name: N, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Returns `true` for the `.` and `..` pseudo-entries
    #[must_use]
    pub fn is_pseudo(&self) -> bool {
        self.name == "." || self.name == ".."
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

pub type ServiceResult<T> = Result<T, Status>;

/// Service entry point. This is `async_trait`
#[async_trait]
pub trait Connector: Send + Sync {
    /// Initializes the service and registers `auth` as the callback used
    /// whenever a share challenges this connection.
    async fn connect(&self, auth: Arc<dyn Authenticator>) -> ServiceResult<Box<dyn Connection>>;
}

/// Address-keyed remote filesystem primitives. This is `async_trait`
#[async_trait]
pub trait Connection: Send + Sync {
    async fn open(&self, url: &str, flags: OpenFlags, mode: u32) -> ServiceResult<Handle>;

    /// Reads up to `buf.len()` bytes. `Ok(0)` marks end of file.
    async fn read(&self, handle: Handle, buf: &mut [u8]) -> ServiceResult<usize>;

    /// Returns how many bytes were accepted, which may be fewer than offered.
    async fn write(&self, handle: Handle, buf: &[u8]) -> ServiceResult<usize>;

    async fn close(&self, handle: Handle) -> ServiceResult<()>;

    async fn opendir(&self, url: &str) -> ServiceResult<Handle>;

    /// Next entry of an open directory, `Ok(None)` once exhausted.
    async fn readdir(&self, handle: Handle) -> ServiceResult<Option<DirEntry>>;

    async fn closedir(&self, handle: Handle) -> ServiceResult<()>;

    async fn unlink(&self, url: &str) -> ServiceResult<()>;

    async fn rmdir(&self, url: &str) -> ServiceResult<()>;

    async fn rename(&self, old_url: &str, new_url: &str) -> ServiceResult<()>;
}

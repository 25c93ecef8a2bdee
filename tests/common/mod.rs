#![allow(dead_code)]

use async_trait::async_trait;
use smb_remote_fs::{
    auth::Authenticator,
    memory::{MemoryConnector, ShareAccess},
    service::{Connection, Connector, DirEntry, Handle, OpenFlags, ServiceResult},
    Credentials, RemoteLocator, Session, Status,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

pub const SERVER: &str = "nas";
pub const PUBLIC: &str = "public";
pub const HOME: &str = "home";
pub const USER: &str = "alice";
pub const PASSWORD: &str = "wonderland";

pub const EIO: i32 = 5;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Service with a guest share and a share guarded by [`USER`]/[`PASSWORD`]
pub fn memory_service() -> MemoryConnector {
    init_logging();
    let connector = MemoryConnector::new();
    connector.add_share(SERVER, PUBLIC, ShareAccess::Guest);
    connector.add_share(SERVER, HOME, ShareAccess::account(USER, PASSWORD));
    connector
}

pub fn guest_session(connector: &MemoryConnector) -> Session {
    Session::new(Arc::new(connector.clone()), Credentials::guest())
}

pub fn public(path: &str) -> RemoteLocator {
    RemoteLocator::new(SERVER, PUBLIC, path)
}

pub fn url(path: &str) -> String {
    public(path).url()
}

/// Deterministic, non-repeating-looking payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + i / 251) as u8).collect()
}

/// Faults injected by [`FaultyConnector`], counted per connector
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// zero-based write call that only accepts half of its buffer
    pub short_write_at: Option<usize>,
    /// zero-based read call that fails with `EIO`
    pub read_error_at: Option<usize>,
    /// address whose unlink fails with `EIO`
    pub deny_unlink: Option<String>,
    /// every read waits forever
    pub stall_reads: bool,
}

#[derive(Clone)]
pub struct FaultyConnector {
    inner: MemoryConnector,
    faults: Faults,
    pub writes: Arc<AtomicUsize>,
    pub reads: Arc<AtomicUsize>,
}

impl FaultyConnector {
    pub fn new(inner: MemoryConnector, faults: Faults) -> Self {
        Self {
            inner,
            faults,
            writes: Arc::new(AtomicUsize::new(0)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn session(&self) -> Session {
        Session::new(Arc::new(self.clone()), Credentials::guest())
    }

    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FaultyConnector {
    async fn connect(&self, auth: Arc<dyn Authenticator>) -> ServiceResult<Box<dyn Connection>> {
        Ok(Box::new(FaultyConnection {
            inner: self.inner.connect(auth).await?,
            faults: self.faults.clone(),
            writes: self.writes.clone(),
            reads: self.reads.clone(),
        }))
    }
}

struct FaultyConnection {
    inner: Box<dyn Connection>,
    faults: Faults,
    writes: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

#[async_trait]
impl Connection for FaultyConnection {
    async fn open(&self, url: &str, flags: OpenFlags, mode: u32) -> ServiceResult<Handle> {
        self.inner.open(url, flags, mode).await
    }

    async fn read(&self, handle: Handle, buf: &mut [u8]) -> ServiceResult<usize> {
        if self.faults.stall_reads {
            std::future::pending::<()>().await;
        }
        let call = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.faults.read_error_at == Some(call) {
            return Err(Status::new(EIO, "injected read error"));
        }
        self.inner.read(handle, buf).await
    }

    async fn write(&self, handle: Handle, buf: &[u8]) -> ServiceResult<usize> {
        let call = self.writes.fetch_add(1, Ordering::SeqCst);
        if self.faults.short_write_at == Some(call) {
            return self.inner.write(handle, &buf[..buf.len() / 2]).await;
        }
        self.inner.write(handle, buf).await
    }

    async fn close(&self, handle: Handle) -> ServiceResult<()> {
        self.inner.close(handle).await
    }

    async fn opendir(&self, url: &str) -> ServiceResult<Handle> {
        self.inner.opendir(url).await
    }

    async fn readdir(&self, handle: Handle) -> ServiceResult<Option<DirEntry>> {
        self.inner.readdir(handle).await
    }

    async fn closedir(&self, handle: Handle) -> ServiceResult<()> {
        self.inner.closedir(handle).await
    }

    async fn unlink(&self, url: &str) -> ServiceResult<()> {
        if self.faults.deny_unlink.as_deref() == Some(url) {
            return Err(Status::new(EIO, "injected unlink error"));
        }
        self.inner.unlink(url).await
    }

    async fn rmdir(&self, url: &str) -> ServiceResult<()> {
        self.inner.rmdir(url).await
    }

    async fn rename(&self, old_url: &str, new_url: &str) -> ServiceResult<()> {
        self.inner.rename(old_url, new_url).await
    }
}

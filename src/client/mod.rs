mod delete;
mod entry;
mod list;
mod rename;
mod transfer;

pub use entry::RemoteEntry;

use serde::{Deserialize, Serialize};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::{self, Instant};

use crate::{
    auth::{Authenticator, CredentialContext, Credentials},
    error::{Error, RemoteResult, Status},
    service::{
        errno, Connection, Connector, DirEntry, Handle, OpenFlags, ServiceResult,
    },
};

pub const DOWNLOAD_CHUNK: usize = 4096;
pub const UPLOAD_CHUNK: usize = 4096;
pub const PROGRESS_UPLOAD_CHUNK: usize = 8192;

/// Tunables for a [`Session`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub download_chunk: usize,
    pub upload_chunk: usize,
    pub progress_chunk: usize,
    /// Upper bound for the service requests of one operation. `None` waits
    /// indefinitely.
    pub timeout_secs: Option<u64>,
}

impl SessionConfig {
    #[must_use]
    pub const fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Checks that every chunk size is usable.
    pub fn validate(&self) -> RemoteResult<()> {
        for (name, size) in [
            ("download_chunk", self.download_chunk),
            ("upload_chunk", self.upload_chunk),
            ("progress_chunk", self.progress_chunk),
        ] {
            if size == 0 {
                return Err(Error::Config(format!("{name} must not be zero")));
            }
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            download_chunk: DOWNLOAD_CHUNK,
            upload_chunk: UPLOAD_CHUNK,
            progress_chunk: PROGRESS_UPLOAD_CHUNK,
            timeout_secs: None,
        }
    }
}

/// High-level access to a remote share on behalf of one identity.
///
/// Each operation connects on its own, registering the session's
/// authenticator with the service, and releases every handle it opened
/// before returning.
pub struct Session {
    connector: Arc<dyn Connector>,
    auth: Arc<dyn Authenticator>,
    config: SessionConfig,
}

impl Session {
    pub fn new(connector: Arc<dyn Connector>, credentials: Credentials) -> Self {
        Self::with_authenticator(connector, Arc::new(credentials))
    }

    /// Session that reads its identity from a shared [`CredentialContext`]
    /// at challenge time.
    pub fn with_context(connector: Arc<dyn Connector>, context: CredentialContext) -> Self {
        Self::with_authenticator(connector, Arc::new(context))
    }

    pub fn with_authenticator(connector: Arc<dyn Connector>, auth: Arc<dyn Authenticator>) -> Self {
        Self {
            connector,
            auth,
            config: SessionConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connects for one operation. The configured timeout starts here and
    /// bounds every request made through the returned connection.
    async fn connect(&self) -> RemoteResult<Box<dyn Connection>> {
        let limit = self.config.timeout();
        let deadline = limit.map(|limit| (Instant::now() + limit, limit));

        let connecting = self.connector.connect(self.auth.clone());
        let inner = match deadline {
            Some((deadline, _)) => time::timeout_at(deadline, connecting).await?,
            None => connecting.await,
        }
        .map_err(|status| {
            warn!("connect: service initialization failed: {}", status);
            Error::Auth(status.to_string())
        })?;

        let conn: Box<dyn Connection> = match deadline {
            Some((deadline, grace)) => Box::new(Bounded {
                inner,
                deadline,
                grace,
            }),
            None => inner,
        };
        Ok(conn)
    }

    /// Runs one operation, reporting a request cut off by the deadline as
    /// [`Error::Timeout`].
    async fn timed<T, F>(&self, operation: F) -> RemoteResult<T>
    where
        F: Future<Output = RemoteResult<T>>,
    {
        match operation.await {
            Err(err) if err.status().is_some_and(|s| s.code == errno::ETIMEDOUT) => {
                warn!("operation timed out: {}", err);
                Err(Error::Timeout)
            }
            result => result,
        }
    }
}

/// Connection whose requests share one deadline. Releasing a handle gets a
/// fresh `grace` period instead, so an expired operation still closes what
/// it opened.
struct Bounded {
    inner: Box<dyn Connection>,
    deadline: Instant,
    grace: Duration,
}

fn expired() -> Status {
    Status::new(errno::ETIMEDOUT, "operation timed out")
}

impl Bounded {
    async fn bound<T, F>(&self, request: F) -> ServiceResult<T>
    where
        F: Future<Output = ServiceResult<T>> + Send,
    {
        time::timeout_at(self.deadline, request)
            .await
            .unwrap_or_else(|_| Err(expired()))
    }

    async fn release<F>(&self, request: F) -> ServiceResult<()>
    where
        F: Future<Output = ServiceResult<()>> + Send,
    {
        time::timeout(self.grace, request)
            .await
            .unwrap_or_else(|_| Err(expired()))
    }
}

#[async_trait]
impl Connection for Bounded {
    async fn open(&self, url: &str, flags: OpenFlags, mode: u32) -> ServiceResult<Handle> {
        self.bound(self.inner.open(url, flags, mode)).await
    }

    async fn read(&self, handle: Handle, buf: &mut [u8]) -> ServiceResult<usize> {
        self.bound(self.inner.read(handle, buf)).await
    }

    async fn write(&self, handle: Handle, buf: &[u8]) -> ServiceResult<usize> {
        self.bound(self.inner.write(handle, buf)).await
    }

    async fn close(&self, handle: Handle) -> ServiceResult<()> {
        self.release(self.inner.close(handle)).await
    }

    async fn opendir(&self, url: &str) -> ServiceResult<Handle> {
        self.bound(self.inner.opendir(url)).await
    }

    async fn readdir(&self, handle: Handle) -> ServiceResult<Option<DirEntry>> {
        self.bound(self.inner.readdir(handle)).await
    }

    async fn closedir(&self, handle: Handle) -> ServiceResult<()> {
        self.release(self.inner.closedir(handle)).await
    }

    async fn unlink(&self, url: &str) -> ServiceResult<()> {
        self.bound(self.inner.unlink(url)).await
    }

    async fn rmdir(&self, url: &str) -> ServiceResult<()> {
        self.bound(self.inner.rmdir(url)).await
    }

    async fn rename(&self, old_url: &str, new_url: &str) -> ServiceResult<()> {
        self.bound(self.inner.rename(old_url, new_url)).await
    }
}

async fn close_file(conn: &dyn Connection, handle: Handle, url: &str) {
    if let Err(status) = conn.close(handle).await {
        warn!("close failed for '{}': {}", url, status);
    }
}

async fn close_dir(conn: &dyn Connection, handle: Handle, url: &str) {
    if let Err(status) = conn.closedir(handle).await {
        warn!("closedir failed for '{}': {}", url, status);
    }
}

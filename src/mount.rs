//! Service over shares that are already mounted on the local machine.
//!
//! `smb://server/share/path` maps to `<root>/server/share/path`, which is the
//! layout produced by mounting each share under a per-server directory.
//! Authentication belongs to the mount itself, so the authenticator is only
//! consulted to log which identity the caller expected.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::{Component, Path, PathBuf},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex as SyncMutex, PoisonError,
    },
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncReadExt, AsyncWriteExt},
    sync::Mutex,
};

use crate::{
    auth::{AuthFields, Authenticator},
    error::Status,
    locator::SCHEME,
    service::{
        errno, Connection, Connector, DirEntry, EntryKind, Handle, OpenFlags, ServiceResult,
    },
};

/// [`Connector`] for a directory of mounted shares
#[derive(Debug, Clone)]
pub struct MountConnector {
    root: PathBuf,
}

impl MountConnector {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Connector for MountConnector {
    async fn connect(&self, auth: Arc<dyn Authenticator>) -> ServiceResult<Box<dyn Connection>> {
        let metadata = fs::metadata(&self.root).await?;
        if !metadata.is_dir() {
            return Err(Status::new(errno::ENOTDIR, "mount root is not a directory"));
        }

        debug!("mount service: connected at '{}'", self.root.display());
        Ok(Box::new(MountConnection {
            root: self.root.clone(),
            auth,
            announced: SyncMutex::new(HashSet::new()),
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU32::new(1),
        }))
    }
}

enum Open {
    File(File),
    Dir(VecDeque<DirEntry>),
}

struct MountConnection {
    root: PathBuf,
    auth: Arc<dyn Authenticator>,
    announced: SyncMutex<HashSet<(String, String)>>,
    handles: Mutex<HashMap<u32, Open>>,
    next_handle: AtomicU32,
}

impl MountConnection {
    /// Maps an address onto the local tree. Paths that would leave the root
    /// are refused.
    fn resolve(&self, url: &str) -> ServiceResult<(PathBuf, bool)> {
        let rest = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| Status::new(errno::EINVAL, "unsupported url scheme"))?;
        let mut segments = rest.splitn(3, '/');
        let server = segments.next().unwrap_or_default();
        let share = segments.next().unwrap_or_default();
        let path = segments.next().unwrap_or_default();
        if server.is_empty() {
            return Err(Status::new(errno::EINVAL, "missing server"));
        }

        let relative = Path::new(server).join(share).join(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Status::new(errno::EINVAL, "path escapes the mount root"));
        }

        if !share.is_empty() {
            self.announce(server, share);
        }

        Ok((self.root.join(relative), share.is_empty()))
    }

    fn resolve_file(&self, url: &str) -> ServiceResult<PathBuf> {
        match self.resolve(url)? {
            (_, true) => Err(Status::new(errno::EINVAL, "missing share")),
            (path, false) => Ok(path),
        }
    }

    fn is_share_root(&self, path: &Path) -> bool {
        !path
            .strip_prefix(&self.root)
            .is_ok_and(|relative| relative.components().count() > 2)
    }

    fn announce(&self, server: &str, share: &str) {
        let key = (server.to_owned(), share.to_owned());
        let first = self
            .announced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        if first {
            let mut fields = AuthFields::default();
            self.auth.authenticate(server, share, &mut fields);
            debug!(
                "mount service: smb://{}/{} used as '{}', access decided by the mount",
                server,
                share,
                fields.username.as_str()
            );
        }
    }

    async fn register(&self, open: Open) -> Handle {
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let _ = self.handles.lock().await.insert(id, open);
        Handle(id)
    }
}

#[cfg(unix)]
fn set_mode(options: &mut OpenOptions, mode: u32) {
    if mode != 0 {
        let _ = options.mode(mode);
    }
}

#[cfg(not(unix))]
fn set_mode(_: &mut OpenOptions, _: u32) {}

fn bad_handle() -> Status {
    Status::new(errno::EBADF, "bad handle")
}

#[async_trait]
impl Connection for MountConnection {
    async fn open(&self, url: &str, flags: OpenFlags, mode: u32) -> ServiceResult<Handle> {
        let path = self.resolve_file(url)?;

        let mut options = OpenOptions::new();
        let _ = options
            .read(flags.contains(OpenFlags::READ))
            .write(flags.contains(OpenFlags::WRITE))
            .append(flags.contains(OpenFlags::APPEND))
            .truncate(flags.contains(OpenFlags::TRUNCATE));
        if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUDE) {
            let _ = options.create_new(true);
        } else {
            let _ = options.create(flags.contains(OpenFlags::CREATE));
        }
        set_mode(&mut options, mode);

        let file = options.open(&path).await?;
        if file.metadata().await?.is_dir() {
            return Err(Status::new(errno::EISDIR, "is a directory"));
        }

        Ok(self.register(Open::File(file)).await)
    }

    async fn read(&self, handle: Handle, buf: &mut [u8]) -> ServiceResult<usize> {
        match self.handles.lock().await.get_mut(&handle.0) {
            Some(Open::File(file)) => Ok(file.read(buf).await?),
            _ => Err(bad_handle()),
        }
    }

    async fn write(&self, handle: Handle, buf: &[u8]) -> ServiceResult<usize> {
        match self.handles.lock().await.get_mut(&handle.0) {
            Some(Open::File(file)) => Ok(file.write(buf).await?),
            _ => Err(bad_handle()),
        }
    }

    async fn close(&self, handle: Handle) -> ServiceResult<()> {
        let mut handles = self.handles.lock().await;
        if !matches!(handles.get(&handle.0), Some(Open::File(_))) {
            return Err(bad_handle());
        }
        if let Some(Open::File(mut file)) = handles.remove(&handle.0) {
            file.flush().await?;
        }
        Ok(())
    }

    async fn opendir(&self, url: &str) -> ServiceResult<Handle> {
        let (path, server_root) = self.resolve(url)?;

        let mut entries = VecDeque::from([
            DirEntry::new(".", EntryKind::Dir),
            DirEntry::new("..", EntryKind::Dir),
        ]);

        let mut dir = fs::read_dir(&path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let is_dir = entry.file_type().await?.is_dir();
            let kind = match (server_root, is_dir) {
                (true, true) => EntryKind::FileShare,
                (true, false) => continue,
                (false, true) => EntryKind::Dir,
                (false, false) => EntryKind::File,
            };
            entries.push_back(DirEntry::new(
                entry.file_name().to_string_lossy(),
                kind,
            ));
        }

        Ok(self.register(Open::Dir(entries)).await)
    }

    async fn readdir(&self, handle: Handle) -> ServiceResult<Option<DirEntry>> {
        match self.handles.lock().await.get_mut(&handle.0) {
            Some(Open::Dir(entries)) => Ok(entries.pop_front()),
            _ => Err(bad_handle()),
        }
    }

    async fn closedir(&self, handle: Handle) -> ServiceResult<()> {
        let mut handles = self.handles.lock().await;
        match handles.get(&handle.0) {
            Some(Open::Dir(_)) => {
                let _ = handles.remove(&handle.0);
                Ok(())
            }
            _ => Err(bad_handle()),
        }
    }

    async fn unlink(&self, url: &str) -> ServiceResult<()> {
        let path = self.resolve_file(url)?;
        if fs::symlink_metadata(&path).await?.is_dir() {
            return Err(Status::new(errno::EISDIR, "is a directory"));
        }
        Ok(fs::remove_file(&path).await?)
    }

    async fn rmdir(&self, url: &str) -> ServiceResult<()> {
        let path = self.resolve_file(url)?;
        if self.is_share_root(&path) {
            return Err(Status::new(errno::EACCES, "cannot remove share root"));
        }
        Ok(fs::remove_dir(&path).await?)
    }

    async fn rename(&self, old_url: &str, new_url: &str) -> ServiceResult<()> {
        let old = self.resolve_file(old_url)?;
        let new = self.resolve_file(new_url)?;

        let share_of = |path: &Path| {
            path.strip_prefix(&self.root)
                .ok()
                .map(|p| p.components().take(2).collect::<PathBuf>())
        };
        if share_of(&old) != share_of(&new) {
            return Err(Status::new(errno::EXDEV, "cross-share rename"));
        }
        if old == new {
            let _ = fs::symlink_metadata(&old).await?;
            return Ok(());
        }

        Ok(fs::rename(&old, &new).await?)
    }
}

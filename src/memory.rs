//! In-memory service.
//!
//! Holds servers and shares entirely in process memory. Shares are either
//! open to guests or guarded by an account table, and a connection is only
//! challenged the first time it touches a guarded share. Successful
//! mutations are journaled so callers can inspect the order in which
//! entries were removed or renamed.

use bytes::BytesMut;
use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use crate::{
    auth::{AuthFields, Authenticator},
    error::Status,
    locator::{join_path, SCHEME},
    service::{
        errno, Connection, Connector, DirEntry, EntryKind, Handle, OpenFlags, ServiceResult,
    },
};

fn fail(code: i32, message: &str) -> Status {
    Status::new(code, message)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn split_parent(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

/// Who may use a share
#[derive(Debug, Clone)]
pub enum ShareAccess {
    Guest,
    /// username → password
    Accounts(HashMap<String, String>),
}

impl ShareAccess {
    pub fn account<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        let mut accounts = HashMap::new();
        let _ = accounts.insert(username.into(), password.into());
        Self::Accounts(accounts)
    }
}

/// Mutating primitive recorded in the journal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Unlink(String),
    Rmdir(String),
    Rename(String, String),
}

enum Node {
    File(BytesMut),
    Dir(Vec<String>),
}

struct Share {
    access: ShareAccess,
    nodes: BTreeMap<String, Node>,
}

impl Share {
    fn new(access: ShareAccess) -> Self {
        let mut nodes = BTreeMap::new();
        let _ = nodes.insert(String::new(), Node::Dir(vec![]));
        Self { access, nodes }
    }

    fn children_of(&mut self, path: &str) -> ServiceResult<&mut Vec<String>> {
        match self.nodes.get_mut(path) {
            Some(Node::Dir(children)) => Ok(children),
            Some(Node::File(_)) => Err(fail(errno::ENOTDIR, "not a directory")),
            None => Err(fail(errno::ENOENT, "no such file or directory")),
        }
    }

    fn insert(&mut self, path: &str, node: Node) -> ServiceResult<()> {
        let (parent, name) = split_parent(path);
        self.children_of(parent)?.push(name.to_owned());
        let _ = self.nodes.insert(path.to_owned(), node);
        Ok(())
    }

    fn detach(&mut self, path: &str) {
        let (parent, name) = split_parent(path);
        if let Some(Node::Dir(children)) = self.nodes.get_mut(parent) {
            children.retain(|child| child != name);
        }
    }

    fn mkdir_all(&mut self, path: &str) -> ServiceResult<()> {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = join_path(&current, segment);
            match self.nodes.get(&current) {
                Some(Node::Dir(_)) => {}
                Some(Node::File(_)) => return Err(fail(errno::ENOTDIR, "not a directory")),
                None => self.insert(&current, Node::Dir(vec![]))?,
            }
        }
        Ok(())
    }

    fn rename(&mut self, old: &str, new: &str) -> ServiceResult<()> {
        if old == new && self.nodes.contains_key(old) {
            return Ok(());
        }
        if old.is_empty() || new.is_empty() || new.starts_with(&format!("{old}/")) {
            return Err(fail(errno::EINVAL, "invalid rename target"));
        }

        let old_is_dir = match self.nodes.get(old) {
            Some(Node::Dir(_)) => true,
            Some(Node::File(_)) => false,
            None => return Err(fail(errno::ENOENT, "no such file or directory")),
        };
        match self.nodes.get(new) {
            Some(Node::Dir(_)) => return Err(fail(errno::EEXIST, "destination exists")),
            Some(Node::File(_)) if old_is_dir => {
                return Err(fail(errno::ENOTDIR, "destination is not a directory"))
            }
            Some(Node::File(_)) => {
                self.detach(new);
                let _ = self.nodes.remove(new);
            }
            None => {}
        }
        let _ = self.children_of(split_parent(new).0)?;

        let prefix = format!("{old}/");
        let moved: Vec<String> = self
            .nodes
            .keys()
            .filter(|key| key.as_str() == old || key.starts_with(&prefix))
            .cloned()
            .collect();

        self.detach(old);
        for key in moved {
            if let Some(node) = self.nodes.remove(&key) {
                let renamed = format!("{new}{}", &key[old.len()..]);
                let _ = self.nodes.insert(renamed, node);
            }
        }

        let (parent, name) = split_parent(new);
        self.children_of(parent)?.push(name.to_owned());
        Ok(())
    }
}

#[derive(Default)]
struct State {
    servers: BTreeMap<String, BTreeMap<String, Share>>,
    journal: Vec<Call>,
    challenges: usize,
    open_handles: usize,
}

impl State {
    fn share_mut(&mut self, server: &str, share: &str) -> ServiceResult<&mut Share> {
        self.servers
            .get_mut(server)
            .and_then(|shares| shares.get_mut(share))
            .ok_or_else(|| fail(errno::ENOENT, "no such share"))
    }
}

/// Parsed `smb://server/share/path` address
struct Target {
    server: String,
    share: String,
    path: String,
}

impl Target {
    fn parse(url: &str) -> ServiceResult<Self> {
        let rest = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| fail(errno::EINVAL, "unsupported url scheme"))?;
        let mut parts = rest.splitn(3, '/');
        let server = parts.next().unwrap_or_default();
        if server.is_empty() {
            return Err(fail(errno::EINVAL, "missing server"));
        }

        Ok(Self {
            server: server.to_owned(),
            share: parts.next().unwrap_or_default().to_owned(),
            path: parts.next().unwrap_or_default().trim_end_matches('/').to_owned(),
        })
    }

    fn require_share(url: &str) -> ServiceResult<Self> {
        let target = Self::parse(url)?;
        if target.share.is_empty() {
            return Err(fail(errno::EINVAL, "missing share"));
        }
        Ok(target)
    }
}

/// In-memory [`Connector`]. Clones share the same tree.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<State>>,
}

impl MemoryConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an empty share, replacing any share of the same name.
    pub fn add_share(&self, server: &str, share: &str, access: ShareAccess) {
        let _ = lock(&self.state)
            .servers
            .entry(server.to_owned())
            .or_default()
            .insert(share.to_owned(), Share::new(access));
    }

    /// Creates `path` and any missing parent directories.
    pub fn create_dir(&self, server: &str, share: &str, path: &str) -> ServiceResult<()> {
        lock(&self.state).share_mut(server, share)?.mkdir_all(path)
    }

    /// Writes a file, creating parent directories as needed.
    pub fn put_file(&self, server: &str, share: &str, path: &str, data: &[u8]) -> ServiceResult<()> {
        let mut state = lock(&self.state);
        let share = state.share_mut(server, share)?;
        share.mkdir_all(split_parent(path).0)?;

        match share.nodes.get_mut(path) {
            Some(Node::File(contents)) => {
                contents.clear();
                contents.extend_from_slice(data);
                Ok(())
            }
            Some(Node::Dir(_)) => Err(fail(errno::EISDIR, "is a directory")),
            None => share.insert(path, Node::File(BytesMut::from(data))),
        }
    }

    #[must_use]
    pub fn read_file(&self, server: &str, share: &str, path: &str) -> Option<Vec<u8>> {
        let mut state = lock(&self.state);
        match state.share_mut(server, share).ok()?.nodes.get(path) {
            Some(Node::File(contents)) => Some(contents.to_vec()),
            _ => None,
        }
    }

    #[must_use]
    pub fn exists(&self, server: &str, share: &str, path: &str) -> bool {
        lock(&self.state)
            .share_mut(server, share)
            .is_ok_and(|share| share.nodes.contains_key(path))
    }

    #[must_use]
    pub fn journal(&self) -> Vec<Call> {
        lock(&self.state).journal.clone()
    }

    pub fn clear_journal(&self) {
        lock(&self.state).journal.clear();
    }

    /// Number of times any connection asked its authenticator for credentials
    #[must_use]
    pub fn challenges(&self) -> usize {
        lock(&self.state).challenges
    }

    /// Handles opened and not yet closed, across all connections
    #[must_use]
    pub fn open_handles(&self) -> usize {
        lock(&self.state).open_handles
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, auth: Arc<dyn Authenticator>) -> ServiceResult<Box<dyn Connection>> {
        debug!("memory service: new connection");
        Ok(Box::new(MemoryConnection {
            state: self.state.clone(),
            auth,
            authorized: Mutex::new(HashSet::new()),
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU32::new(1),
        }))
    }
}

enum Open {
    File {
        server: String,
        share: String,
        path: String,
        pos: usize,
        flags: OpenFlags,
    },
    Dir(VecDeque<DirEntry>),
}

struct MemoryConnection {
    state: Arc<Mutex<State>>,
    auth: Arc<dyn Authenticator>,
    authorized: Mutex<HashSet<(String, String)>>,
    handles: Mutex<HashMap<u32, Open>>,
    next_handle: AtomicU32,
}

impl MemoryConnection {
    fn authorize(&self, target: &Target) -> ServiceResult<()> {
        let key = (target.server.clone(), target.share.clone());
        if lock(&self.authorized).contains(&key) {
            return Ok(());
        }

        let access = lock(&self.state)
            .share_mut(&target.server, &target.share)?
            .access
            .clone();

        if let ShareAccess::Accounts(accounts) = access {
            let mut fields = AuthFields::default();
            self.auth
                .authenticate(&target.server, &target.share, &mut fields);
            lock(&self.state).challenges += 1;

            let accepted = accounts
                .get(fields.username.as_str())
                .is_some_and(|password| password == fields.password.as_str());
            if !accepted {
                return Err(fail(errno::EACCES, "access denied"));
            }
        }

        let _ = lock(&self.authorized).insert(key);
        Ok(())
    }

    fn register(&self, open: Open) -> Handle {
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let _ = lock(&self.handles).insert(id, open);
        lock(&self.state).open_handles += 1;
        Handle(id)
    }

    fn release(&self, handle: Handle, dir: bool) -> ServiceResult<()> {
        let mut handles = lock(&self.handles);
        match handles.get(&handle.0) {
            Some(Open::Dir(_)) if dir => {}
            Some(Open::File { .. }) if !dir => {}
            _ => return Err(fail(errno::EBADF, "bad handle")),
        }
        let _ = handles.remove(&handle.0);
        let mut state = lock(&self.state);
        state.open_handles = state.open_handles.saturating_sub(1);
        Ok(())
    }

    fn record(&self, call: Call) {
        lock(&self.state).journal.push(call);
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn open(&self, url: &str, flags: OpenFlags, _mode: u32) -> ServiceResult<Handle> {
        let target = Target::require_share(url)?;
        self.authorize(&target)?;

        let pos = {
            let mut state = lock(&self.state);
            let share = state.share_mut(&target.server, &target.share)?;
            match share.nodes.get_mut(&target.path) {
                Some(Node::Dir(_)) => return Err(fail(errno::EISDIR, "is a directory")),
                Some(Node::File(_))
                    if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUDE) =>
                {
                    return Err(fail(errno::EEXIST, "file exists"))
                }
                Some(Node::File(contents)) => {
                    if flags.contains(OpenFlags::WRITE | OpenFlags::TRUNCATE) {
                        contents.clear();
                    }
                    if flags.contains(OpenFlags::APPEND) {
                        contents.len()
                    } else {
                        0
                    }
                }
                None if flags.contains(OpenFlags::CREATE) => {
                    share.insert(&target.path, Node::File(BytesMut::new()))?;
                    0
                }
                None => return Err(fail(errno::ENOENT, "no such file or directory")),
            }
        };

        Ok(self.register(Open::File {
            server: target.server,
            share: target.share,
            path: target.path,
            pos,
            flags,
        }))
    }

    async fn read(&self, handle: Handle, buf: &mut [u8]) -> ServiceResult<usize> {
        let mut handles = lock(&self.handles);
        let Some(Open::File {
            server,
            share,
            path,
            pos,
            flags,
        }) = handles.get_mut(&handle.0)
        else {
            return Err(fail(errno::EBADF, "bad handle"));
        };
        if !flags.contains(OpenFlags::READ) {
            return Err(fail(errno::EBADF, "not open for reading"));
        }

        let mut state = lock(&self.state);
        let Some(Node::File(contents)) = state.share_mut(server, share)?.nodes.get(path.as_str())
        else {
            return Err(fail(errno::EBADF, "file no longer exists"));
        };

        let start = (*pos).min(contents.len());
        let len = buf.len().min(contents.len() - start);
        buf[..len].copy_from_slice(&contents[start..start + len]);
        *pos = start + len;
        Ok(len)
    }

    async fn write(&self, handle: Handle, buf: &[u8]) -> ServiceResult<usize> {
        let mut handles = lock(&self.handles);
        let Some(Open::File {
            server,
            share,
            path,
            pos,
            flags,
        }) = handles.get_mut(&handle.0)
        else {
            return Err(fail(errno::EBADF, "bad handle"));
        };
        if !flags.contains(OpenFlags::WRITE) {
            return Err(fail(errno::EBADF, "not open for writing"));
        }

        let mut state = lock(&self.state);
        let Some(Node::File(contents)) =
            state.share_mut(server, share)?.nodes.get_mut(path.as_str())
        else {
            return Err(fail(errno::EBADF, "file no longer exists"));
        };

        let end = *pos + buf.len();
        if contents.len() < end {
            contents.resize(end, 0);
        }
        contents[*pos..end].copy_from_slice(buf);
        *pos = end;
        Ok(buf.len())
    }

    async fn close(&self, handle: Handle) -> ServiceResult<()> {
        self.release(handle, false)
    }

    async fn opendir(&self, url: &str) -> ServiceResult<Handle> {
        let target = Target::parse(url)?;

        let mut entries = VecDeque::from([
            DirEntry::new(".", EntryKind::Dir),
            DirEntry::new("..", EntryKind::Dir),
        ]);

        if target.share.is_empty() {
            let state = lock(&self.state);
            let shares = state
                .servers
                .get(&target.server)
                .ok_or_else(|| fail(errno::ENOENT, "no such server"))?;
            entries.extend(
                shares
                    .keys()
                    .map(|name| DirEntry::new(name.as_str(), EntryKind::FileShare)),
            );
        } else {
            self.authorize(&target)?;
            let mut state = lock(&self.state);
            let share = state.share_mut(&target.server, &target.share)?;
            let children = share.children_of(&target.path)?.clone();
            for name in children {
                let kind = match share.nodes.get(&join_path(&target.path, &name)) {
                    Some(Node::Dir(_)) => EntryKind::Dir,
                    _ => EntryKind::File,
                };
                entries.push_back(DirEntry::new(name, kind));
            }
        }

        Ok(self.register(Open::Dir(entries)))
    }

    async fn readdir(&self, handle: Handle) -> ServiceResult<Option<DirEntry>> {
        match lock(&self.handles).get_mut(&handle.0) {
            Some(Open::Dir(entries)) => Ok(entries.pop_front()),
            _ => Err(fail(errno::EBADF, "bad handle")),
        }
    }

    async fn closedir(&self, handle: Handle) -> ServiceResult<()> {
        self.release(handle, true)
    }

    async fn unlink(&self, url: &str) -> ServiceResult<()> {
        let target = Target::require_share(url)?;
        self.authorize(&target)?;

        {
            let mut state = lock(&self.state);
            let share = state.share_mut(&target.server, &target.share)?;
            match share.nodes.get(&target.path) {
                Some(Node::File(_)) => {
                    share.detach(&target.path);
                    let _ = share.nodes.remove(&target.path);
                }
                Some(Node::Dir(_)) => return Err(fail(errno::EISDIR, "is a directory")),
                None => return Err(fail(errno::ENOENT, "no such file or directory")),
            }
        }

        self.record(Call::Unlink(url.to_owned()));
        Ok(())
    }

    async fn rmdir(&self, url: &str) -> ServiceResult<()> {
        let target = Target::require_share(url)?;
        self.authorize(&target)?;

        {
            let mut state = lock(&self.state);
            let share = state.share_mut(&target.server, &target.share)?;
            match share.nodes.get(&target.path) {
                _ if target.path.is_empty() => {
                    return Err(fail(errno::EACCES, "cannot remove share root"))
                }
                Some(Node::Dir(children)) if !children.is_empty() => {
                    return Err(fail(errno::ENOTEMPTY, "directory not empty"))
                }
                Some(Node::Dir(_)) => {
                    share.detach(&target.path);
                    let _ = share.nodes.remove(&target.path);
                }
                Some(Node::File(_)) => return Err(fail(errno::ENOTDIR, "not a directory")),
                None => return Err(fail(errno::ENOENT, "no such file or directory")),
            }
        }

        self.record(Call::Rmdir(url.to_owned()));
        Ok(())
    }

    async fn rename(&self, old_url: &str, new_url: &str) -> ServiceResult<()> {
        let old = Target::require_share(old_url)?;
        let new = Target::require_share(new_url)?;
        if old.server != new.server || old.share != new.share {
            return Err(fail(errno::EXDEV, "cross-share rename"));
        }
        self.authorize(&old)?;

        lock(&self.state)
            .share_mut(&old.server, &old.share)?
            .rename(&old.path, &new.path)?;

        self.record(Call::Rename(old_url.to_owned(), new_url.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credentials;

    const SERVER: &str = "nas";

    fn connector() -> MemoryConnector {
        let connector = MemoryConnector::new();
        connector.add_share(SERVER, "public", ShareAccess::Guest);
        connector.add_share(SERVER, "home", ShareAccess::account("alice", "pw"));
        connector
    }

    async fn connect(connector: &MemoryConnector, credentials: Credentials) -> Box<dyn Connection> {
        connector.connect(Arc::new(credentials)).await.unwrap()
    }

    #[tokio::test]
    async fn test_opendir_yields_pseudo_entries_first() {
        let connector = connector();
        connector.put_file(SERVER, "public", "a.txt", b"a").unwrap();
        connector.create_dir(SERVER, "public", "sub").unwrap();
        let conn = connect(&connector, Credentials::guest()).await;

        let handle = conn.opendir("smb://nas/public").await.unwrap();
        let mut names = vec![];
        while let Some(entry) = conn.readdir(handle).await.unwrap() {
            names.push((entry.name, entry.kind));
        }
        conn.closedir(handle).await.unwrap();

        assert_eq!(
            names,
            vec![
                (".".to_owned(), EntryKind::Dir),
                ("..".to_owned(), EntryKind::Dir),
                ("a.txt".to_owned(), EntryKind::File),
                ("sub".to_owned(), EntryKind::Dir),
            ]
        );
        assert_eq!(connector.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_server_root_lists_shares() {
        let connector = connector();
        let conn = connect(&connector, Credentials::guest()).await;

        let handle = conn.opendir("smb://nas").await.unwrap();
        let mut shares = vec![];
        while let Some(entry) = conn.readdir(handle).await.unwrap() {
            if entry.kind == EntryKind::FileShare {
                shares.push(entry.name);
            }
        }

        assert_eq!(shares, vec!["home".to_owned(), "public".to_owned()]);
    }

    #[tokio::test]
    async fn test_guarded_share_challenges_once() {
        let connector = connector();
        let conn = connect(&connector, Credentials::new("alice", "pw")).await;
        assert_eq!(connector.challenges(), 0);

        conn.opendir("smb://nas/home").await.unwrap();
        conn.opendir("smb://nas/home").await.unwrap();
        conn.opendir("smb://nas/public").await.unwrap();

        assert_eq!(connector.challenges(), 1);
    }

    #[tokio::test]
    async fn test_wrong_password_is_denied() {
        let connector = connector();
        let conn = connect(&connector, Credentials::new("alice", "nope")).await;

        let status = conn.opendir("smb://nas/home").await.unwrap_err();
        assert_eq!(status.code, errno::EACCES);

        let guest = connect(&connector, Credentials::guest()).await;
        let status = guest.unlink("smb://nas/home/x").await.unwrap_err();
        assert_eq!(status.code, errno::EACCES);
    }

    #[tokio::test]
    async fn test_rmdir_refuses_non_empty() {
        let connector = connector();
        connector.put_file(SERVER, "public", "dir/f", b"x").unwrap();
        let conn = connect(&connector, Credentials::guest()).await;

        let status = conn.rmdir("smb://nas/public/dir").await.unwrap_err();
        assert_eq!(status.code, errno::ENOTEMPTY);

        conn.unlink("smb://nas/public/dir/f").await.unwrap();
        conn.rmdir("smb://nas/public/dir").await.unwrap();
        assert!(!connector.exists(SERVER, "public", "dir"));
        assert_eq!(
            connector.journal(),
            vec![
                Call::Unlink("smb://nas/public/dir/f".to_owned()),
                Call::Rmdir("smb://nas/public/dir".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn test_rename_moves_subtree() {
        let connector = connector();
        connector.put_file(SERVER, "public", "a/b/c.txt", b"c").unwrap();
        connector.create_dir(SERVER, "public", "z").unwrap();
        let conn = connect(&connector, Credentials::guest()).await;

        conn.rename("smb://nas/public/a", "smb://nas/public/z/a2")
            .await
            .unwrap();

        assert!(!connector.exists(SERVER, "public", "a"));
        assert_eq!(
            connector.read_file(SERVER, "public", "z/a2/b/c.txt"),
            Some(b"c".to_vec())
        );
    }

    #[tokio::test]
    async fn test_rename_across_shares_is_rejected() {
        let connector = connector();
        connector.put_file(SERVER, "public", "f", b"x").unwrap();
        let conn = connect(&connector, Credentials::new("alice", "pw")).await;

        let status = conn
            .rename("smb://nas/public/f", "smb://nas/home/f")
            .await
            .unwrap_err();
        assert_eq!(status.code, errno::EXDEV);
    }

    #[tokio::test]
    async fn test_open_truncates_for_write() {
        let connector = connector();
        connector.put_file(SERVER, "public", "f", b"old contents").unwrap();
        let conn = connect(&connector, Credentials::guest()).await;

        let handle = conn
            .open(
                "smb://nas/public/f",
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                0o666,
            )
            .await
            .unwrap();
        assert_eq!(conn.write(handle, b"new").await.unwrap(), 3);
        conn.close(handle).await.unwrap();

        assert_eq!(connector.read_file(SERVER, "public", "f"), Some(b"new".to_vec()));
        assert_eq!(conn.close(handle).await.unwrap_err().code, errno::EBADF);
    }
}

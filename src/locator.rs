use serde::{Deserialize, Serialize};

pub const SCHEME: &str = "smb://";

/// Composes a service address from its parts.
///
/// The share and path segments are only appended when non-empty. Nothing is
/// escaped, so the caller must pass segments that are already valid.
#[must_use]
pub fn build_url(server: &str, share: &str, path: &str) -> String {
    let mut url = String::with_capacity(SCHEME.len() + server.len() + share.len() + path.len() + 2);
    url.push_str(SCHEME);
    url.push_str(server);
    if !share.is_empty() {
        url.push('/');
        url.push_str(share);
    }
    if !path.is_empty() {
        url.push('/');
        url.push_str(path);
    }
    url
}

/// Joins a relative path and a child name with a single slash.
#[must_use]
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_owned()
    } else {
        format!("{parent}/{name}")
    }
}

/// Server, share and slash-separated path identifying a remote resource.
/// An empty path is the share root.
///
/// Paths are not sanitized: `.` and `..` segments are passed through as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteLocator {
    pub server: String,
    pub share: String,
    pub path: String,
}

impl RemoteLocator {
    pub fn new<S, H, P>(server: S, share: H, path: P) -> Self
    where
        S: Into<String>,
        H: Into<String>,
        P: Into<String>,
    {
        Self {
            server: server.into(),
            share: share.into(),
            path: path.into(),
        }
    }

    #[must_use]
    pub fn url(&self) -> String {
        build_url(&self.server, &self.share, &self.path)
    }

    /// Address of another path on the same server and share.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        build_url(&self.server, &self.share, path)
    }

    #[must_use]
    pub fn with_path<P: Into<String>>(&self, path: P) -> Self {
        Self {
            server: self.server.clone(),
            share: self.share.clone(),
            path: path.into(),
        }
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        self.with_path(join_path(&self.path, name))
    }
}

use super::{close_dir, entry::RemoteEntry, Session};
use crate::{
    error::{Error, RemoteResult},
    locator::RemoteLocator,
    service::{Connection, DirEntry, Handle},
};

impl Session {
    /// Returns the children of a remote directory in the order the service
    /// yields them, without the `.` and `..` pseudo-entries.
    ///
    /// An empty directory gives an empty vector; a directory that cannot be
    /// opened gives [`Error::Enumerate`].
    pub async fn list_directory(&self, locator: &RemoteLocator) -> RemoteResult<Vec<RemoteEntry>> {
        self.timed(async {
            let conn = self.connect().await?;
            let url = locator.url();

            let handle = conn.opendir(&url).await.map_err(|status| {
                warn!("list_directory: failed to open '{}': {}", url, status);
                Error::Enumerate {
                    url: url.clone(),
                    status,
                }
            })?;

            let entries = drain_dir(conn.as_ref(), handle, &url).await?;
            debug!("list_directory: {} entries in '{}'", entries.len(), url);

            Ok(entries.into_iter().map(RemoteEntry::from).collect())
        })
        .await
    }
}

/// Reads every entry of an open directory except `.` and `..`, then closes
/// the handle whatever the outcome.
pub(super) async fn drain_dir(
    conn: &dyn Connection,
    handle: Handle,
    url: &str,
) -> RemoteResult<Vec<DirEntry>> {
    let mut entries = vec![];

    let result = loop {
        match conn.readdir(handle).await {
            Ok(Some(entry)) if entry.is_pseudo() => continue,
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => break Ok(entries),
            Err(status) => {
                warn!("readdir failed for '{}': {}", url, status);
                break Err(Error::Enumerate {
                    url: url.to_owned(),
                    status,
                });
            }
        }
    };

    close_dir(conn, handle, url).await;
    result
}

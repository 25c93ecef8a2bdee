use std::collections::VecDeque;

use super::{list::drain_dir, Session};
use crate::{
    error::{Error, Op, RemoteResult},
    locator::{join_path, RemoteLocator},
    service::{Connection, DirEntry},
};

/// A directory whose children are still being removed
struct Frame {
    path: String,
    url: String,
    pending: VecDeque<DirEntry>,
}

impl Session {
    /// Removes a single file, or an empty directory when `is_directory` is set.
    pub async fn delete(&self, locator: &RemoteLocator, is_directory: bool) -> RemoteResult<()> {
        self.timed(async {
            let conn = self.connect().await?;
            let url = locator.url();

            if is_directory {
                rmdir(conn.as_ref(), &url).await
            } else {
                unlink(conn.as_ref(), &url).await
            }
        })
        .await
    }

    /// Removes a whole subtree, children before their parent.
    ///
    /// A target that cannot be opened as a directory is unlinked as a file.
    /// The first failure aborts everything that is still pending; whatever
    /// was removed up to that point stays removed.
    pub async fn delete_recursive(&self, locator: &RemoteLocator) -> RemoteResult<()> {
        self.timed(async {
            let conn = self.connect().await?;
            let conn = conn.as_ref();

            let mut stack = match open_frame(conn, locator, locator.path.clone()).await? {
                Some(frame) => vec![frame],
                None => return Ok(()),
            };

            while let Some(frame) = stack.last_mut() {
                if let Some(entry) = frame.pending.pop_front() {
                    let child = join_path(&frame.path, &entry.name);
                    if entry.is_dir() {
                        if let Some(child_frame) = open_frame(conn, locator, child).await? {
                            stack.push(child_frame);
                        }
                    } else {
                        unlink(conn, &locator.url_for(&child)).await?;
                    }
                } else if let Some(done) = stack.pop() {
                    rmdir(conn, &done.url).await?;
                }
            }

            Ok(())
        })
        .await
    }
}

/// Opens `path` as a directory and reads its children. A path that does not
/// open as a directory is unlinked instead and yields `None`.
async fn open_frame(
    conn: &dyn Connection,
    locator: &RemoteLocator,
    path: String,
) -> RemoteResult<Option<Frame>> {
    let url = locator.url_for(&path);

    let handle = match conn.opendir(&url).await {
        Ok(handle) => handle,
        Err(dir_status) => {
            return match conn.unlink(&url).await {
                Ok(()) => {
                    info!("delete_recursive: unlinked file '{}'", url);
                    Ok(None)
                }
                Err(status) => {
                    warn!(
                        "delete_recursive: opendir ({}) and unlink failed for '{}': {}",
                        dir_status.code, url, status
                    );
                    Err(Error::Service {
                        op: Op::Unlink,
                        url,
                        status,
                    })
                }
            };
        }
    };

    let pending = drain_dir(conn, handle, &url).await?.into();

    Ok(Some(Frame { path, url, pending }))
}

async fn unlink(conn: &dyn Connection, url: &str) -> RemoteResult<()> {
    conn.unlink(url).await.map_err(|status| {
        warn!("unlink failed for '{}': {}", url, status);
        Error::Service {
            op: Op::Unlink,
            url: url.to_owned(),
            status,
        }
    })?;

    info!("unlinked file '{}'", url);
    Ok(())
}

async fn rmdir(conn: &dyn Connection, url: &str) -> RemoteResult<()> {
    conn.rmdir(url).await.map_err(|status| {
        warn!("rmdir failed for '{}': {}", url, status);
        Error::Service {
            op: Op::Rmdir,
            url: url.to_owned(),
            status,
        }
    })?;

    info!("removed directory '{}'", url);
    Ok(())
}

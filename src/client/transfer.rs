use std::{io, path::Path};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};

use super::{close_file, Session};
use crate::{
    error::{Error, RemoteResult},
    locator::RemoteLocator,
    service::{Connection, Handle, OpenFlags},
};

const REMOTE_CREATE_MODE: u32 = 0o666;

type Progress<'a> = Option<&'a mut (dyn FnMut(usize) + Send)>;

impl Session {
    /// Copies a remote file to `local_path`, creating or truncating it.
    pub async fn download<P: AsRef<Path>>(
        &self,
        locator: &RemoteLocator,
        local_path: P,
    ) -> RemoteResult<()> {
        let local_path = local_path.as_ref();

        self.timed(async {
            self.config.validate()?;
            let conn = self.connect().await?;
            let url = locator.url();

            let remote = conn.open(&url, OpenFlags::READ, 0).await.map_err(|status| {
                warn!("download: failed to open remote '{}': {}", url, status);
                Error::Open {
                    url: url.clone(),
                    status,
                }
            })?;

            let mut local = match File::create(local_path).await {
                Ok(file) => file,
                Err(err) => {
                    warn!(
                        "download: failed to create local '{}': {}",
                        local_path.display(),
                        err
                    );
                    close_file(conn.as_ref(), remote, &url).await;
                    return Err(err.into());
                }
            };

            let result = copy_to_local(
                conn.as_ref(),
                remote,
                &url,
                &mut local,
                self.config.download_chunk,
            )
            .await;

            drop(local);
            close_file(conn.as_ref(), remote, &url).await;

            let total = result?;
            info!(
                "download: '{}' -> '{}' ({} bytes)",
                url,
                local_path.display(),
                total
            );
            Ok(())
        })
        .await
    }

    /// Copies `local_path` to a remote file, creating or truncating it.
    pub async fn upload<P: AsRef<Path>>(
        &self,
        locator: &RemoteLocator,
        local_path: P,
    ) -> RemoteResult<()> {
        self.upload_chunked(
            "upload",
            locator,
            local_path.as_ref(),
            self.config.upload_chunk,
            None,
        )
        .await
    }

    /// Like [`upload`](Self::upload) with larger chunks, calling
    /// `on_chunk_written` with the size of every chunk once the remote side
    /// has accepted all of it.
    pub async fn upload_with_progress<P, F>(
        &self,
        locator: &RemoteLocator,
        local_path: P,
        on_chunk_written: Option<F>,
    ) -> RemoteResult<()>
    where
        P: AsRef<Path>,
        F: FnMut(usize) + Send,
    {
        let mut on_chunk_written = on_chunk_written;
        let progress: Progress<'_> = on_chunk_written
            .as_mut()
            .map(|callback| -> &mut (dyn FnMut(usize) + Send) { callback });

        self.upload_chunked(
            "upload_with_progress",
            locator,
            local_path.as_ref(),
            self.config.progress_chunk,
            progress,
        )
        .await
    }

    async fn upload_chunked(
        &self,
        op: &str,
        locator: &RemoteLocator,
        local_path: &Path,
        chunk: usize,
        progress: Progress<'_>,
    ) -> RemoteResult<()> {
        self.timed(async {
            self.config.validate()?;
            let conn = self.connect().await?;
            let url = locator.url();

            let mut local = File::open(local_path).await.map_err(|err| {
                warn!(
                    "{}: failed to open local file '{}': {}",
                    op,
                    local_path.display(),
                    err
                );
                Error::from(err)
            })?;

            let remote = match conn
                .open(
                    &url,
                    OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                    REMOTE_CREATE_MODE,
                )
                .await
            {
                Ok(handle) => handle,
                Err(status) => {
                    warn!("{}: failed to open remote '{}': {}", op, url, status);
                    drop(local);
                    return Err(Error::Open { url, status });
                }
            };

            let result =
                copy_to_remote(conn.as_ref(), remote, &url, &mut local, chunk, progress).await;

            close_file(conn.as_ref(), remote, &url).await;
            drop(local);

            match result {
                Ok(total) => {
                    info!(
                        "{}: upload finished for local '{}' -> '{}' ({} bytes)",
                        op,
                        local_path.display(),
                        url,
                        total
                    );
                    Ok(())
                }
                Err(err) => {
                    warn!("{}: {}", op, err);
                    Err(err)
                }
            }
        })
        .await
    }
}

async fn copy_to_local(
    conn: &dyn Connection,
    remote: Handle,
    url: &str,
    local: &mut File,
    chunk: usize,
) -> RemoteResult<u64> {
    let mut buffer = vec![0; chunk];
    let mut total = 0;

    loop {
        let len = conn
            .read(remote, &mut buffer)
            .await
            .map_err(|status| {
                warn!("download: read error on '{}': {}", url, status);
                Error::Read {
                    url: url.to_owned(),
                    status,
                }
            })?
            .min(buffer.len());

        if len == 0 {
            break;
        }

        local.write_all(&buffer[..len]).await?;
        total += len as u64;
    }

    local.flush().await?;
    Ok(total)
}

async fn copy_to_remote(
    conn: &dyn Connection,
    remote: Handle,
    url: &str,
    local: &mut File,
    chunk: usize,
    mut progress: Progress<'_>,
) -> RemoteResult<u64> {
    let mut buffer = vec![0; chunk];
    let mut total = 0;

    loop {
        let len = fill_chunk(local, &mut buffer).await?;
        if len == 0 {
            break;
        }

        let written = conn
            .write(remote, &buffer[..len])
            .await
            .map_err(|status| Error::Write {
                url: url.to_owned(),
                status,
            })?;

        if written != len {
            return Err(Error::PartialWrite {
                url: url.to_owned(),
                written,
                expected: len,
            });
        }

        total += written as u64;
        if let Some(callback) = progress.as_mut() {
            callback(written);
        }

        if len < buffer.len() {
            break;
        }
    }

    Ok(total)
}

/// Reads until `buffer` is full or the file ends, so only the last chunk of
/// a file can be short.
async fn fill_chunk(local: &mut File, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;

    while filled < buffer.len() {
        match local.read(&mut buffer[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }

    Ok(filled)
}

use std::{fmt, io};
use thiserror::Error;
use tokio::time::error::Elapsed as TimeElapsed;

/// Error code reported by the underlying service. The code is errno-like
/// and is passed through undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: i32,
    pub message: String,
}

impl Status {
    pub fn new<M: Into<String>>(code: i32, message: M) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (errno={})", self.message, self.code)
    }
}

impl From<io::Error> for Status {
    fn from(err: io::Error) -> Self {
        Self::new(err.raw_os_error().unwrap_or(-1), err.to_string())
    }
}

/// Which mutating primitive a [`Error::Service`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Unlink,
    Rmdir,
    Rename,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unlink => "unlink",
            Self::Rmdir => "rmdir",
            Self::Rename => "rename",
        })
    }
}

/// Enum for remote filesystem errors
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Remote file could not be opened or created
    #[error("failed to open remote '{url}': {status}")]
    Open { url: String, status: Status },
    /// Any errors related to the local side of a transfer
    #[error("I/O: {0}")]
    Io(String),
    /// A chunk was only partly accepted by the remote side
    #[error("short write to '{url}' (wrote {written} of {expected})")]
    PartialWrite {
        url: String,
        written: usize,
        expected: usize,
    },
    /// Directory could not be opened or read
    #[error("failed to enumerate '{url}': {status}")]
    Enumerate { url: String, status: Status },
    /// Remote read failed in the middle of a transfer
    #[error("read error on '{url}': {status}")]
    Read { url: String, status: Status },
    /// Remote write returned an error
    #[error("write error on '{url}': {status}")]
    Write { url: String, status: Status },
    /// Unlink, rmdir or rename rejected by the service
    #[error("{op} failed for '{url}': {status}")]
    Service { op: Op, url: String, status: Status },
    /// Session configuration cannot be used
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Connection setup or authentication rejected
    #[error("authentication: {0}")]
    Auth(String),
    /// Time limit for the operation exceeded
    #[error("Timeout")]
    Timeout,
}

impl Error {
    /// Returns the service status code when the error carries one.
    #[must_use]
    pub const fn status(&self) -> Option<&Status> {
        match self {
            Self::Open { status, .. }
            | Self::Enumerate { status, .. }
            | Self::Read { status, .. }
            | Self::Write { status, .. }
            | Self::Service { status, .. } => Some(status),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<TimeElapsed> for Error {
    fn from(_: TimeElapsed) -> Self {
        Self::Timeout
    }
}

pub type RemoteResult<T> = Result<T, Error>;

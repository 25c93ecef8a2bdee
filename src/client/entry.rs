use serde::{Deserialize, Serialize};

use crate::service::DirEntry;

/// One child of a listed remote directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    name: String,
    is_directory: bool,
    size: u64,
}

impl RemoteEntry {
    /// Returns the file name for the file that this entry points at.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// Size is not queried while listing and stays at `0`.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }
}

impl From<DirEntry> for RemoteEntry {
    fn from(entry: DirEntry) -> Self {
        Self {
            is_directory: entry.is_dir(),
            name: entry.name,
            size: 0,
        }
    }
}

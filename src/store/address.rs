// Archive Address
// Composite key `relativePath@syncpointId\zipFilename` of a compressed entry

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

/// Location of a file inside a syncpoint archive.
///
/// The owning syncpoint may be older than the syncpoint that references the
/// entry, because unchanged files are never stored twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveAddress {
    /// Forward-slash entry name inside the archive
    pub relative_path: String,
    /// Syncpoint whose directory holds the archive
    pub owning_syncpoint_id: String,
    /// Archive file name
    pub archive_filename: String,
}

impl ArchiveAddress {
    /// Build an address
    pub fn new(
        relative_path: impl Into<String>,
        owning_syncpoint_id: impl Into<String>,
        archive_filename: impl Into<String>,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            owning_syncpoint_id: owning_syncpoint_id.into(),
            archive_filename: archive_filename.into(),
        }
    }

    /// Parse `relativePath@syncpointId\zipFilename`.
    ///
    /// The last `@` separates the path, so paths containing `@` still parse.
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = || SyncError::InvalidAddress(address.to_string());

        let (relative_path, rest) = address.rsplit_once('@').ok_or_else(invalid)?;
        let (owning_syncpoint_id, archive_filename) = rest.split_once('\\').ok_or_else(invalid)?;

        if relative_path.is_empty() || owning_syncpoint_id.is_empty() || archive_filename.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(
            relative_path.replace('\\', "/"),
            owning_syncpoint_id,
            archive_filename,
        ))
    }

    /// Full path of the archive under a remote root
    pub fn archive_path(&self, remote_root: &Path) -> PathBuf {
        remote_root
            .join(&self.owning_syncpoint_id)
            .join(&self.archive_filename)
    }
}

impl fmt::Display for ArchiveAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}\\{}",
            self.relative_path, self.owning_syncpoint_id, self.archive_filename
        )
    }
}

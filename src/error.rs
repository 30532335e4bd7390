// Error Types
// Error taxonomy shared by the store, synchronizers, restorer and merge workflows

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Broad classification of a [`SyncError`], used by callers to decide whether
/// an operation may be retried or must be fixed by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or mismatched remote root, duplicate syncpoint id, bad settings
    Configuration,
    /// Missing syncpoint, archive entry, or path
    NotFound,
    /// File stayed locked for the whole retry window
    TransientIo,
    /// Unreadable archive or metadata
    Integrity,
    /// Any other filesystem failure
    Io,
}

/// Errors raised by syncpoint operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Remote store is not usable for the requested operation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Remote root was created with a different compression flag.
    #[error("Compression mismatch at {path}: store is_compressed={stored}, caller expected {expected}")]
    CompressionMismatch {
        /// Remote root path
        path: PathBuf,
        /// Flag recorded in syncpointroot.json
        stored: bool,
        /// Flag requested by the caller
        expected: bool,
    },

    /// A syncpoint with this id already exists in the store.
    #[error("Duplicate syncpoint id: {0}")]
    DuplicateSyncPoint(String),

    /// No syncpoint with this id exists in the store.
    #[error("Syncpoint not found: {0}")]
    SyncPointNotFound(String),

    /// A required file or directory does not exist.
    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    /// An archive does not contain the requested entry.
    #[error("Entry '{entry}' not found in archive {}", .archive.display())]
    EntryNotFound {
        /// Archive path
        archive: PathBuf,
        /// Forward-slash entry name
        entry: String,
    },

    /// Composite archive address could not be parsed.
    #[error("Invalid archive address: {0}")]
    InvalidAddress(String),

    /// Destination stayed locked after every retry attempt.
    #[error("File locked after {attempts} attempts: {}", .path.display())]
    Locked {
        /// Locked path
        path: PathBuf,
        /// Attempts made
        attempts: u32,
        /// Last error observed
        #[source]
        source: io::Error,
    },

    /// Filesystem failure.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Some files of a syncpoint could not be written to the working copy.
    #[error("Restore of {syncpoint} left {failed} file(s) unrestored")]
    IncompleteRestore {
        /// Syncpoint being restored
        syncpoint: String,
        /// Files that failed
        failed: usize,
    },

    /// Archive could not be read or written.
    #[error("Archive error at {}: {source}", .path.display())]
    Archive {
        /// Archive path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: zip::result::ZipError,
    },

    /// Syncpoint or root metadata could not be parsed or written.
    #[error("Metadata error at {}: {source}", .path.display())]
    Metadata {
        /// Metadata file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// YAML settings or remote config could not be parsed or written.
    #[error("Settings error at {}: {source}", .path.display())]
    Settings {
        /// Settings file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_yaml::Error,
    },
}

impl SyncError {
    /// Wrap an IO error with the path that produced it.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return SyncError::PathNotFound(path.as_ref().to_path_buf());
        }
        SyncError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap a zip error with the archive that produced it.
    pub fn archive(path: impl AsRef<Path>, source: zip::result::ZipError) -> Self {
        match source {
            zip::result::ZipError::Io(e) => SyncError::io(path, e),
            other => SyncError::Archive {
                path: path.as_ref().to_path_buf(),
                source: other,
            },
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Configuration(_)
            | SyncError::CompressionMismatch { .. }
            | SyncError::DuplicateSyncPoint(_)
            | SyncError::Settings { .. } => ErrorKind::Configuration,
            SyncError::SyncPointNotFound(_)
            | SyncError::PathNotFound(_)
            | SyncError::EntryNotFound { .. } => ErrorKind::NotFound,
            SyncError::Locked { .. } => ErrorKind::TransientIo,
            SyncError::InvalidAddress(_)
            | SyncError::Archive { .. }
            | SyncError::Metadata { .. } => ErrorKind::Integrity,
            SyncError::Io { .. } | SyncError::IncompleteRestore { .. } => ErrorKind::Io,
        }
    }
}

/// Result type for syncpoint operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_io_becomes_path_not_found() {
        let err = SyncError::io("/tmp/missing", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(matches!(err, SyncError::PathNotFound(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            SyncError::DuplicateSyncPoint("A".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            SyncError::CompressionMismatch {
                path: PathBuf::from("r"),
                stored: true,
                expected: false,
            }
            .kind(),
            ErrorKind::Configuration
        );
        let locked = SyncError::Locked {
            path: PathBuf::from("f"),
            attempts: 10,
            source: io::Error::new(io::ErrorKind::PermissionDenied, "busy"),
        };
        assert_eq!(locked.kind(), ErrorKind::TransientIo);
        assert!(locked.to_string().contains("10 attempts"));
    }

    #[test]
    fn test_display_mentions_entry() {
        let err = SyncError::EntryNotFound {
            archive: PathBuf::from("a.zip"),
            entry: "docs/readme.md".into(),
        };
        assert!(err.to_string().contains("docs/readme.md"));
    }
}

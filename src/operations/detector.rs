// Change Detector
// Decides whether a source file has to be copied over its destination

use std::fs::{self, Metadata};
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, SyncError};
use crate::utilities::{sha256_file, Digest256};

/// Archive timestamps are only accurate to this many seconds
pub const ARCHIVE_TIME_TOLERANCE_SECS: i64 = 2;

/// How precise a destination timestamp is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePrecision {
    /// Filesystem timestamp, compared as-is
    Exact,
    /// Zip entry timestamp, truncated to whole (even) seconds
    Archive,
}

/// Modification time and size of a file or archive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    /// Last modification time
    pub modified: SystemTime,
    /// Size in bytes
    pub size: u64,
    /// Precision of `modified`
    pub precision: TimePrecision,
}

impl FileStamp {
    /// Stamp from filesystem metadata
    pub fn from_metadata(metadata: &Metadata) -> io::Result<Self> {
        Ok(Self {
            modified: metadata.modified()?,
            size: metadata.len(),
            precision: TimePrecision::Exact,
        })
    }

    /// Stamp of a file, or `None` when it does not exist
    pub fn of_file(path: &Path) -> Result<Option<Self>> {
        match fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => FileStamp::from_metadata(&metadata)
                .map(Some)
                .map_err(|e| SyncError::io(path, e)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::io(path, e)),
        }
    }

    /// Whole seconds since the Unix epoch, negative before it
    pub fn unix_seconds(&self) -> i64 {
        match self.modified.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        }
    }

    /// Same size and, within the precision of either side, the same time
    pub fn matches(&self, other: &FileStamp) -> bool {
        if self.size != other.size {
            return false;
        }
        if self.precision == TimePrecision::Archive || other.precision == TimePrecision::Archive {
            (self.unix_seconds() - other.unix_seconds()).abs() <= ARCHIVE_TIME_TOLERANCE_SECS
        } else {
            self.modified == other.modified
        }
    }
}

/// Outcome of the copy decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDecision {
    /// Always-overwrite policy is on
    Overwrite,
    /// Destination does not exist
    Create,
    /// Source is newer than destination
    Update,
    /// Sizes differ
    RepairSize,
    /// Strict mode found different content
    RepairChecksum,
    /// Destination is up to date
    Skip,
}

impl CopyDecision {
    /// Whether bytes have to be copied
    pub fn needs_copy(&self) -> bool {
        !matches!(self, CopyDecision::Skip)
    }

    /// Short label for logs and progress messages
    pub fn label(&self) -> &'static str {
        match self {
            CopyDecision::Overwrite => "overwrite",
            CopyDecision::Create => "create",
            CopyDecision::Update => "update",
            CopyDecision::RepairSize => "repair (size mismatch)",
            CopyDecision::RepairChecksum => "repair (checksum mismatch)",
            CopyDecision::Skip => "unchanged",
        }
    }
}

/// Stateless copy policy shared by every synchronizer backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeDetector {
    /// Copy regardless of timestamps
    pub always_overwrite: bool,
    /// Compare SHA-256 digests as a last step
    pub strict: bool,
}

impl ChangeDetector {
    /// Detector that only copies what changed, without hashing
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector that also compares content digests
    pub fn strict() -> Self {
        Self {
            always_overwrite: false,
            strict: true,
        }
    }

    /// Whether `source` counts as newer than `destination`
    pub fn is_newer(source: &FileStamp, destination: &FileStamp) -> bool {
        match destination.precision {
            TimePrecision::Archive => {
                (source.unix_seconds() - destination.unix_seconds()).abs()
                    > ARCHIVE_TIME_TOLERANCE_SECS
            }
            TimePrecision::Exact => source.modified > destination.modified,
        }
    }

    /// Decision from stamps alone; strict mode hashing is left to [`decide`](Self::decide)
    pub fn decide_stamps(&self, source: &FileStamp, destination: Option<&FileStamp>) -> CopyDecision {
        if self.always_overwrite {
            return CopyDecision::Overwrite;
        }
        let Some(destination) = destination else {
            return CopyDecision::Create;
        };
        if Self::is_newer(source, destination) {
            return CopyDecision::Update;
        }
        if source.size != destination.size {
            return CopyDecision::RepairSize;
        }
        CopyDecision::Skip
    }

    /// Full decision for a source file.
    ///
    /// `destination_digest` is only called in strict mode, after every cheaper
    /// check passed. Returning `None` marks the destination as unreadable,
    /// which is repaired by copying.
    pub fn decide<F>(
        &self,
        source: &Path,
        destination: Option<FileStamp>,
        destination_digest: F,
    ) -> Result<CopyDecision>
    where
        F: FnOnce() -> Result<Option<Digest256>>,
    {
        let source_stamp = FileStamp::of_file(source)?
            .ok_or_else(|| SyncError::PathNotFound(source.to_path_buf()))?;

        let decision = self.decide_stamps(&source_stamp, destination.as_ref());
        if decision.needs_copy() || !self.strict {
            return Ok(decision);
        }

        let source_digest = sha256_file(source).map_err(|e| SyncError::io(source, e))?;
        match destination_digest()? {
            Some(digest) if digest == source_digest => Ok(CopyDecision::Skip),
            _ => Ok(CopyDecision::RepairChecksum),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stamp(secs: u64, size: u64, precision: TimePrecision) -> FileStamp {
        FileStamp {
            modified: UNIX_EPOCH + Duration::from_secs(secs),
            size,
            precision,
        }
    }

    #[test]
    fn test_missing_destination_is_create() {
        let detector = ChangeDetector::new();
        let source = stamp(1_000, 10, TimePrecision::Exact);
        assert_eq!(detector.decide_stamps(&source, None), CopyDecision::Create);
    }

    #[test]
    fn test_always_overwrite_wins() {
        let detector = ChangeDetector {
            always_overwrite: true,
            strict: false,
        };
        let source = stamp(1_000, 10, TimePrecision::Exact);
        let dest = stamp(1_000, 10, TimePrecision::Exact);
        assert_eq!(detector.decide_stamps(&source, Some(&dest)), CopyDecision::Overwrite);
    }

    #[test]
    fn test_archive_entry_older_by_more_than_tolerance_is_update() {
        let detector = ChangeDetector::new();
        let source = stamp(1_010, 10, TimePrecision::Exact);
        let entry = stamp(1_000, 10, TimePrecision::Archive);
        assert_eq!(detector.decide_stamps(&source, Some(&entry)), CopyDecision::Update);
    }

    #[test]
    fn test_archive_entry_within_tolerance_is_skip() {
        let detector = ChangeDetector::new();
        let source = stamp(1_001, 10, TimePrecision::Exact);
        let entry = stamp(1_000, 10, TimePrecision::Archive);
        assert_eq!(detector.decide_stamps(&source, Some(&entry)), CopyDecision::Skip);
        let entry = stamp(1_002, 10, TimePrecision::Archive);
        assert_eq!(detector.decide_stamps(&source, Some(&entry)), CopyDecision::Skip);
    }

    #[test]
    fn test_size_mismatch_is_repair() {
        let detector = ChangeDetector::new();
        let source = stamp(1_000, 11, TimePrecision::Exact);
        let dest = stamp(2_000, 10, TimePrecision::Exact);
        assert_eq!(detector.decide_stamps(&source, Some(&dest)), CopyDecision::RepairSize);
    }

    #[test]
    fn test_strict_mode_compares_digests() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("a.txt");
        let dest = dir.path().join("b.txt");
        fs::write(&source, "same size A").unwrap();
        fs::write(&dest, "same size B").unwrap();
        let mtime = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&source, mtime).unwrap();
        filetime::set_file_mtime(&dest, mtime).unwrap();

        let dest_stamp = FileStamp::of_file(&dest).unwrap();

        let relaxed = ChangeDetector::new();
        let decision = relaxed
            .decide(&source, dest_stamp, || panic!("digest not needed"))
            .unwrap();
        assert_eq!(decision, CopyDecision::Skip);

        let strict = ChangeDetector::strict();
        let decision = strict
            .decide(&source, dest_stamp, || Ok(Some(sha256_file(&dest).unwrap())))
            .unwrap();
        assert_eq!(decision, CopyDecision::RepairChecksum);

        fs::write(&dest, "same size A").unwrap();
        filetime::set_file_mtime(&dest, mtime).unwrap();
        let decision = strict
            .decide(&source, FileStamp::of_file(&dest).unwrap(), || {
                Ok(Some(sha256_file(&dest).unwrap()))
            })
            .unwrap();
        assert_eq!(decision, CopyDecision::Skip);
    }

    #[test]
    fn test_unreadable_destination_is_repaired() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("a.txt");
        fs::write(&source, "content").unwrap();
        let stamp = FileStamp::of_file(&source).unwrap();

        let decision = ChangeDetector::strict().decide(&source, stamp, || Ok(None)).unwrap();
        assert_eq!(decision, CopyDecision::RepairChecksum);
    }

    #[test]
    fn test_stamp_matching_respects_precision() {
        let exact = stamp(1_000, 5, TimePrecision::Exact);
        assert!(exact.matches(&stamp(1_000, 5, TimePrecision::Exact)));
        assert!(!exact.matches(&stamp(1_001, 5, TimePrecision::Exact)));
        assert!(exact.matches(&stamp(1_002, 5, TimePrecision::Archive)));
        assert!(!exact.matches(&stamp(1_003, 5, TimePrecision::Archive)));
        assert!(!exact.matches(&stamp(1_000, 6, TimePrecision::Archive)));
    }
}

// Archive Backend
// Zip-backed synchronizer and the entry-level helpers the store and restorer share

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Datelike, Local, NaiveDate, TimeZone, Timelike};
use fs2::FileExt;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::detector::{ChangeDetector, CopyDecision, FileStamp, TimePrecision};
use super::sync::Synchronizer;
use crate::core::SyncSettings;
use crate::error::{Result, SyncError};
use crate::store::ArchiveAddress;
use crate::utilities::{sha256_reader, Digest256, PatternMatcher, RetryPolicy};

// ============================================================================
// Timestamps
// ============================================================================

/// Zip timestamp for a file time.
///
/// Archives carry local wall-clock time without a zone, so the conversion
/// goes through the local time zone. Times outside the zip range collapse to
/// the format's epoch (1980-01-01).
pub fn system_to_zip_time(time: SystemTime) -> zip::DateTime {
    let local: chrono::DateTime<Local> = time.into();
    let Ok(year) = u16::try_from(local.year()) else {
        return zip::DateTime::default();
    };
    zip::DateTime::from_date_and_time(
        year,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .unwrap_or_default()
}

/// File time for a zip timestamp, read as local time
pub fn zip_time_to_system(time: zip::DateTime) -> Option<SystemTime> {
    let date = NaiveDate::from_ymd_opt(
        i32::from(time.year()),
        u32::from(time.month()),
        u32::from(time.day()),
    )?;
    let naive = date.and_hms_opt(
        u32::from(time.hour()),
        u32::from(time.minute()),
        u32::from(time.second()),
    )?;
    let local = Local.from_local_datetime(&naive).earliest()?;
    Some(SystemTime::from(local))
}

// ============================================================================
// Entry access
// ============================================================================

/// Open an archive for reading; an unreadable archive is fatal
pub fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path).map_err(|e| SyncError::io(path, e))?;
    ZipArchive::new(file).map_err(|e| SyncError::archive(path, e))
}

/// Stamp of an entry in an open archive, `None` when the entry is missing
pub fn entry_stamp_in(
    archive: &mut ZipArchive<File>,
    archive_path: &Path,
    name: &str,
) -> Result<Option<FileStamp>> {
    match archive.by_name(name) {
        Ok(entry) => Ok(Some(FileStamp {
            modified: entry
                .last_modified()
                .and_then(zip_time_to_system)
                .unwrap_or(UNIX_EPOCH),
            size: entry.size(),
            precision: TimePrecision::Archive,
        })),
        Err(ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(SyncError::archive(archive_path, e)),
    }
}

/// Stamp of an entry, `None` when the archive or the entry is missing
pub fn entry_stamp(archive_path: &Path, name: &str) -> Result<Option<FileStamp>> {
    if !archive_path.is_file() {
        return Ok(None);
    }
    let mut archive = open_archive(archive_path)?;
    entry_stamp_in(&mut archive, archive_path, name)
}

/// Digest of an entry; `None` when it is missing or fails to decompress
pub fn entry_digest(archive_path: &Path, name: &str) -> Result<Option<Digest256>> {
    if !archive_path.is_file() {
        return Ok(None);
    }
    let mut archive = open_archive(archive_path)?;
    let digest = match archive.by_name(name) {
        Ok(entry) => sha256_reader(entry).ok(),
        Err(ZipError::FileNotFound) => None,
        Err(e) => {
            tracing::warn!("Entry {} in {} is unreadable: {}", name, archive_path.display(), e);
            None
        }
    };
    Ok(digest)
}

/// Full content of an entry
pub fn read_entry(archive_path: &Path, name: &str) -> Result<Vec<u8>> {
    let mut archive = open_archive(archive_path)?;
    let mut entry = archive.by_name(name).map_err(|e| match e {
        ZipError::FileNotFound => SyncError::EntryNotFound {
            archive: archive_path.to_path_buf(),
            entry: name.to_string(),
        },
        other => SyncError::archive(archive_path, other),
    })?;

    let mut content = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut content)
        .map_err(|e| SyncError::io(archive_path, e))?;
    Ok(content)
}

/// Extract an entry to `destination` and stamp it with the entry's time
pub fn extract_entry(
    archive: &mut ZipArchive<File>,
    archive_path: &Path,
    name: &str,
    destination: &Path,
    retry: &RetryPolicy,
) -> Result<()> {
    let mut entry = archive.by_name(name).map_err(|e| match e {
        ZipError::FileNotFound => SyncError::EntryNotFound {
            archive: archive_path.to_path_buf(),
            entry: name.to_string(),
        },
        other => SyncError::archive(archive_path, other),
    })?;
    let modified = entry.last_modified().and_then(zip_time_to_system);

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
    }
    let mut output = retry.run(destination, || File::create(destination))?;
    io::copy(&mut entry, &mut output).map_err(|e| SyncError::io(destination, e))?;
    drop(output);

    if let Some(modified) = modified {
        filetime::set_file_mtime(destination, filetime::FileTime::from_system_time(modified))
            .map_err(|e| SyncError::io(destination, e))?;
    }
    Ok(())
}

// ============================================================================
// Exclusive updates
// ============================================================================

/// Exclusive claim on an archive for the duration of one update.
///
/// Held as an OS lock on a sibling `<archive>.lock` file. The kernel drops the
/// lock when the holder exits, so a lock file left by a killed process does not
/// block later writers. Contention is handled by the retry policy.
#[derive(Debug)]
pub struct ArchiveLock {
    file: File,
    path: PathBuf,
}

impl ArchiveLock {
    /// Acquire the lock, waiting within the retry window
    pub fn acquire(archive_path: &Path, retry: &RetryPolicy) -> Result<Self> {
        if let Some(parent) = archive_path.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }
        let mut name: OsString = archive_path.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| SyncError::io(&path, e))?;
        retry.run(&path, || FileExt::try_lock_exclusive(&file))?;
        Ok(Self { file, path })
    }
}

impl Drop for ArchiveLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Could not release archive lock {}: {}", self.path.display(), e);
        }
    }
}

/// Rewrite an archive without the named entries.
///
/// Zip has no in-place delete, so surviving entries are copied raw into a
/// new archive that replaces the old one. Returns whether anything was removed.
pub fn remove_entries(archive_path: &Path, names: &[&str]) -> Result<bool> {
    if !archive_path.is_file() {
        return Ok(false);
    }
    let mut archive = open_archive(archive_path)?;
    if !archive.file_names().any(|n| names.contains(&n)) {
        return Ok(false);
    }

    let mut temp_name: OsString = archive_path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let temp = File::create(&temp_path).map_err(|e| SyncError::io(&temp_path, e))?;
    let mut writer = ZipWriter::new(temp);
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| SyncError::archive(archive_path, e))?;
        if names.contains(&entry.name()) {
            continue;
        }
        writer
            .raw_copy_file(entry)
            .map_err(|e| SyncError::archive(&temp_path, e))?;
    }
    writer
        .finish()
        .map_err(|e| SyncError::archive(&temp_path, e))?;
    drop(archive);

    fs::rename(&temp_path, archive_path).map_err(|e| SyncError::io(archive_path, e))?;
    Ok(true)
}

/// Append a file as a new entry, creating the archive when needed.
///
/// The entry takes the source's modification time in local time.
pub fn append_entry(archive_path: &Path, name: &str, source: &Path, retry: &RetryPolicy) -> Result<()> {
    let metadata = fs::metadata(source).map_err(|e| SyncError::io(source, e))?;
    let mut input = retry.run(source, || File::open(source))?;

    let modified = metadata.modified().map_err(|e| SyncError::io(source, e))?;
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(system_to_zip_time(modified))
        .large_file(metadata.len() >= u64::from(u32::MAX));

    let mut writer = if archive_path.is_file() {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(archive_path)
            .map_err(|e| SyncError::io(archive_path, e))?;
        ZipWriter::new_append(file).map_err(|e| SyncError::archive(archive_path, e))?
    } else {
        if let Some(parent) = archive_path.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }
        let file = File::create(archive_path).map_err(|e| SyncError::io(archive_path, e))?;
        ZipWriter::new(file)
    };

    writer
        .start_file(name, options)
        .map_err(|e| SyncError::archive(archive_path, e))?;
    io::copy(&mut input, &mut writer).map_err(|e| SyncError::io(archive_path, e))?;
    writer
        .finish()
        .map_err(|e| SyncError::archive(archive_path, e))?;
    Ok(())
}

// ============================================================================
// Synchronizer
// ============================================================================

/// Synchronizer backed by a single zip archive
#[derive(Debug, Clone)]
pub struct ZipSynchronizer {
    archive_path: PathBuf,
    /// `(syncpointId, zipFilename)` used for composite entry addresses
    address_parts: Option<(String, String)>,
    detector: ChangeDetector,
    retry: RetryPolicy,
    matcher: PatternMatcher,
}

impl ZipSynchronizer {
    /// Mirror into the archive at `archive_path`
    pub fn new(archive_path: impl Into<PathBuf>, settings: &SyncSettings) -> Self {
        Self {
            archive_path: archive_path.into(),
            address_parts: None,
            detector: settings.detector(),
            retry: settings.retry,
            matcher: settings.matcher(),
        }
    }

    /// Write into `<remote>/<syncpointId>/<zipFilename>`
    pub fn for_syncpoint(
        remote_root: &Path,
        syncpoint_id: &str,
        zip_filename: &str,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            address_parts: Some((syncpoint_id.to_string(), zip_filename.to_string())),
            ..Self::new(remote_root.join(syncpoint_id).join(zip_filename), settings)
        }
    }

    /// Replace the copy policy
    pub fn with_detector(mut self, detector: ChangeDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Archive receiving the files
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Replace or add an entry; the caller holds the lock
    fn write_locked(&self, source: &Path, name: &str) -> Result<()> {
        remove_entries(&self.archive_path, &[name])?;
        append_entry(&self.archive_path, name, source, &self.retry)
    }
}

impl Synchronizer for ZipSynchronizer {
    fn synchronize_file(
        &self,
        source: &Path,
        destination: &str,
        old_destination: Option<&str>,
    ) -> Result<CopyDecision> {
        let _lock = ArchiveLock::acquire(&self.archive_path, &self.retry)?;

        if let Some(old) = old_destination {
            if let Err(e) = remove_entries(&self.archive_path, &[old]) {
                tracing::debug!("Could not remove renamed entry {}: {}", old, e);
            }
        }

        let stamp = entry_stamp(&self.archive_path, destination)?;
        let decision = self
            .detector
            .decide(source, stamp, || entry_digest(&self.archive_path, destination))?;

        if decision.needs_copy() {
            self.write_locked(source, destination)?;
        }
        Ok(decision)
    }

    fn copy_file(&self, source: &Path, destination: &str) -> Result<()> {
        let _lock = ArchiveLock::acquire(&self.archive_path, &self.retry)?;
        self.write_locked(source, destination)
    }

    fn location_of(&self, destination: &str) -> String {
        match &self.address_parts {
            Some((syncpoint_id, zip_filename)) => {
                ArchiveAddress::new(destination, syncpoint_id.as_str(), zip_filename.as_str())
                    .to_string()
            }
            None => destination.to_string(),
        }
    }

    fn detector(&self) -> ChangeDetector {
        self.detector
    }

    fn matcher(&self) -> &PatternMatcher {
        &self.matcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MemoryReporter;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_settings() -> SyncSettings {
        let mut settings = SyncSettings::default();
        settings.retry.delay_ms = 0;
        settings.retry.attempts = 2;
        settings
    }

    fn write_with_mtime(path: &Path, content: &str, unix_secs: i64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
        filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(unix_secs, 0)).unwrap();
    }

    #[test]
    fn test_zip_time_round_trip_within_tolerance() {
        let time = UNIX_EPOCH + Duration::from_secs(1_700_000_001);
        let back = zip_time_to_system(system_to_zip_time(time)).unwrap();
        let delta = time.duration_since(back).unwrap_or_else(|e| e.duration());
        assert!(delta <= Duration::from_secs(2), "delta {:?}", delta);
    }

    #[test]
    fn test_synchronize_creates_then_skips_then_updates() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src").join("notes.txt");
        let archive = dir.path().join("out").join("store.zip");
        write_with_mtime(&source, "first", 1_700_000_000);

        let sync = ZipSynchronizer::new(&archive, &fast_settings());
        assert_eq!(
            sync.synchronize_file(&source, "docs/notes.txt", None).unwrap(),
            CopyDecision::Create
        );
        assert_eq!(
            sync.synchronize_file(&source, "docs/notes.txt", None).unwrap(),
            CopyDecision::Skip
        );

        // Same size, ten seconds newer
        write_with_mtime(&source, "secnd", 1_700_000_010);
        assert_eq!(
            sync.synchronize_file(&source, "docs/notes.txt", None).unwrap(),
            CopyDecision::Update
        );
        assert_eq!(read_entry(&archive, "docs/notes.txt").unwrap(), b"secnd");

        let names: Vec<String> = open_archive(&archive)
            .unwrap()
            .file_names()
            .map(str::to_string)
            .collect();
        assert_eq!(names, vec!["docs/notes.txt".to_string()]);
        assert!(!archive.with_extension("zip.lock").exists());
    }

    #[test]
    fn test_rename_removes_old_entry() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.txt");
        let archive = dir.path().join("store.zip");
        write_with_mtime(&source, "payload", 1_700_000_000);

        let sync = ZipSynchronizer::new(&archive, &fast_settings());
        sync.synchronize_file(&source, "old.txt", None).unwrap();
        sync.synchronize_file(&source, "new.txt", Some("old.txt")).unwrap();

        assert!(entry_stamp(&archive, "old.txt").unwrap().is_none());
        assert_eq!(entry_stamp(&archive, "new.txt").unwrap().unwrap().size, 7);
    }

    #[test]
    fn test_held_lock_escalates_to_transient_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.txt");
        let archive = dir.path().join("store.zip");
        write_with_mtime(&source, "payload", 1_700_000_000);

        let settings = fast_settings();
        let _held = ArchiveLock::acquire(&archive, &settings.retry).unwrap();
        let sync = ZipSynchronizer::new(&archive, &settings);
        let err = sync.copy_file(&source, "a.txt").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TransientIo);
    }

    #[test]
    fn test_lock_file_left_by_dead_process_does_not_block() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.txt");
        let archive = dir.path().join("store.zip");
        write_with_mtime(&source, "payload", 1_700_000_000);
        fs::write(dir.path().join("store.zip.lock"), b"").unwrap();

        let sync = ZipSynchronizer::new(&archive, &fast_settings());
        sync.copy_file(&source, "a.txt").unwrap();
        assert_eq!(entry_stamp(&archive, "a.txt").unwrap().unwrap().size, 7);

        let again = ArchiveLock::acquire(&archive, &fast_settings().retry).unwrap();
        drop(again);
    }

    #[test]
    fn test_corrupt_archive_is_fatal() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("store.zip");
        fs::write(&archive, b"this is not a zip file").unwrap();
        let err = entry_stamp(&archive, "a.txt").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Integrity);
    }

    #[test]
    fn test_extract_sets_entry_time() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.txt");
        let archive = dir.path().join("store.zip");
        write_with_mtime(&source, "payload", 1_700_000_000);
        append_entry(&archive, "a.txt", &source, &RetryPolicy::default()).unwrap();

        let target = dir.path().join("restored").join("a.txt");
        let mut opened = open_archive(&archive).unwrap();
        extract_entry(&mut opened, &archive, "a.txt", &target, &RetryPolicy::default()).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "payload");

        let restored = FileStamp::of_file(&target).unwrap().unwrap();
        let original = FileStamp::of_file(&source).unwrap().unwrap();
        assert!((restored.unix_seconds() - original.unix_seconds()).abs() <= 2);
    }

    #[test]
    fn test_straight_sync_into_archive() {
        let dir = TempDir::new().unwrap();
        let tree = dir.path().join("tree");
        write_with_mtime(&tree.join("a.txt"), "a", 1_700_000_000);
        write_with_mtime(&tree.join("sub").join("b.txt"), "b", 1_700_000_000);
        let archive = dir.path().join("mirror.zip");

        let sync = ZipSynchronizer::new(&archive, &fast_settings());
        let summary = sync
            .full_synchronization(&tree, None, &MemoryReporter::new())
            .unwrap();
        assert_eq!(summary.created, 2);
        assert_eq!(read_entry(&archive, "sub/b.txt").unwrap(), b"b");
    }

    #[test]
    fn test_location_uses_composite_address() {
        let sync = ZipSynchronizer::for_syncpoint(Path::new("/remote"), "SP9", "s.zip", &fast_settings());
        assert_eq!(sync.location_of("a/b.txt"), "a/b.txt@SP9\\s.zip");
        assert_eq!(sync.archive_path(), Path::new("/remote/SP9/s.zip"));
    }
}

// Sync Engine
// Synchronizer capability, the directory backend, and the shared tree walks

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use filetime::FileTime;

use super::detector::{ChangeDetector, CopyDecision, FileStamp};
use crate::core::{Reporter, SyncSettings};
use crate::error::{Result, SyncError};
use crate::store::{content, EntryType, SyncPoint, SyncPointEntry, SyncPointStore};
use crate::utilities::{key_to_path, relative_key, sha256_file, PatternMatcher, RetryPolicy};

/// Counters for one full synchronization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Files copied because the destination was missing
    pub created: usize,
    /// Files copied because the source was newer
    pub updated: usize,
    /// Files copied because size or checksum disagreed
    pub repaired: usize,
    /// Files copied under the always-overwrite policy
    pub overwritten: usize,
    /// Files left alone
    pub unchanged: usize,
    /// Tombstones recorded
    pub deleted: usize,
    /// Syncpoint recorded by this run, if any
    pub syncpoint_id: Option<String>,
}

impl SyncSummary {
    fn record(&mut self, decision: CopyDecision) {
        match decision {
            CopyDecision::Create => self.created += 1,
            CopyDecision::Update => self.updated += 1,
            CopyDecision::RepairSize | CopyDecision::RepairChecksum => self.repaired += 1,
            CopyDecision::Overwrite => self.overwritten += 1,
            CopyDecision::Skip => self.unchanged += 1,
        }
    }

    /// Number of files whose bytes were copied
    pub fn copied(&self) -> usize {
        self.created + self.updated + self.repaired + self.overwritten
    }
}

/// A syncpoint being recorded by a full synchronization
pub struct Recording<'a> {
    /// Store that receives the syncpoint
    pub store: &'a mut SyncPointStore,
    /// Syncpoint returned by [`SyncPointStore::add_syncpoint`]
    pub syncpoint: &'a mut SyncPoint,
}

/// Moves file bytes into a destination (directory or archive).
///
/// Destinations are forward-slash keys relative to the synchronizer's target.
pub trait Synchronizer {
    /// Copy one file if the change detector says so.
    ///
    /// `old_destination` is removed first (rename case); failures removing it
    /// are ignored.
    fn synchronize_file(
        &self,
        source: &Path,
        destination: &str,
        old_destination: Option<&str>,
    ) -> Result<CopyDecision>;

    /// Copy one file unconditionally
    fn copy_file(&self, source: &Path, destination: &str) -> Result<()>;

    /// Remote path recorded in syncpoint entries for a destination key
    fn location_of(&self, destination: &str) -> String;

    /// Copy policy in use
    fn detector(&self) -> ChangeDetector;

    /// Exclusions applied to the source tree
    fn matcher(&self) -> &PatternMatcher;

    /// Synchronize a whole tree.
    ///
    /// Without a recording this mirrors every file 1:1. With one, `self` must
    /// target the recorded syncpoint (see [`SyncPointStore::synchronizer_for`]):
    /// only files that changed since the previous syncpoint are stored, paths
    /// that disappeared get tombstones, and the syncpoint is committed.
    fn full_synchronization(
        &self,
        source_root: &Path,
        recording: Option<Recording<'_>>,
        reporter: &dyn Reporter,
    ) -> Result<SyncSummary> {
        match recording {
            None => straight_sync(self, source_root, reporter),
            Some(recording) => recording_sync(self, source_root, recording, reporter),
        }
    }
}

/// Every file under `root` that is not excluded, as `(path, key)` sorted by key
pub fn collect_files(root: &Path, matcher: &PatternMatcher) -> Result<Vec<(PathBuf, String)>> {
    if !root.is_dir() {
        return Err(SyncError::PathNotFound(root.to_path_buf()));
    }

    let mut files = Vec::new();
    let walker = walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| match relative_key(root, e.path()) {
            Some(key) if e.file_type().is_dir() => !matcher.is_excluded_folder(&key),
            _ => true,
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            SyncError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(key) = relative_key(root, entry.path()) else {
            continue;
        };
        if matcher.should_exclude(&key) {
            continue;
        }
        files.push((entry.into_path(), key));
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

/// Copy a file, retrying while the destination is locked, and carry over its
/// modification time
pub fn copy_with_retry(source: &Path, destination: &Path, retry: &RetryPolicy) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
    }

    let metadata = fs::metadata(source).map_err(|e| SyncError::io(source, e))?;
    retry.run(destination, || fs::copy(source, destination))?;

    let mtime = FileTime::from_last_modification_time(&metadata);
    filetime::set_file_mtime(destination, mtime).map_err(|e| SyncError::io(destination, e))?;
    Ok(())
}

fn straight_sync<S: Synchronizer + ?Sized>(
    sync: &S,
    source_root: &Path,
    reporter: &dyn Reporter,
) -> Result<SyncSummary> {
    let files = collect_files(source_root, sync.matcher())?;
    let total = files.len();
    let mut summary = SyncSummary::default();

    for (index, (path, key)) in files.iter().enumerate() {
        let decision = sync.synchronize_file(path, key, None)?;
        tracing::debug!("{}: {}", key, decision.label());
        summary.record(decision);
        reporter.progress(index + 1, total, key);
    }

    Ok(summary)
}

fn recording_sync<S: Synchronizer + ?Sized>(
    sync: &S,
    source_root: &Path,
    recording: Recording<'_>,
    reporter: &dyn Reporter,
) -> Result<SyncSummary> {
    let Recording { store, syncpoint } = recording;

    let previous: HashMap<String, SyncPointEntry> = match store.latest() {
        Some(latest) => store
            .get_file_entries_at(&latest.id)?
            .into_iter()
            .map(|e| (e.source_path.clone(), e))
            .collect(),
        None => HashMap::new(),
    };

    let files = collect_files(source_root, sync.matcher())?;
    let total = files.len();
    let detector = sync.detector();
    let reader: &SyncPointStore = store;
    let mut summary = SyncSummary::default();
    let mut present: HashSet<&str> = HashSet::with_capacity(total);

    for (index, (path, key)) in files.iter().enumerate() {
        present.insert(key.as_str());

        let decision = match previous.get(key) {
            None => CopyDecision::Create,
            Some(prior) if prior.is_tombstone() => CopyDecision::Create,
            Some(prior) => {
                let stamp = content::entry_stamp(reader, prior)?;
                detector.decide(path, stamp, || content::entry_digest(reader, prior))?
            }
        };

        if decision.needs_copy() {
            sync.copy_file(path, key)?;
            syncpoint.add_entry(key.clone(), sync.location_of(key), EntryType::AddOrChanged);
        }
        tracing::debug!("{}: {}", key, decision.label());
        summary.record(decision);
        reporter.progress(index + 1, total, key);
    }

    let mut removed: Vec<&SyncPointEntry> = previous
        .values()
        .filter(|e| !present.contains(e.source_path.as_str()))
        .collect();
    removed.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    for entry in removed {
        tracing::debug!("{}: deleted", entry.source_path);
        syncpoint.add_entry(
            entry.source_path.clone(),
            entry.relative_remote_path.clone(),
            EntryType::Deleted,
        );
        summary.deleted += 1;
    }

    store.commit(syncpoint)?;
    summary.syncpoint_id = Some(syncpoint.id.clone());
    Ok(summary)
}

/// Synchronizer backed by a plain directory
#[derive(Debug, Clone)]
pub struct DirectorySynchronizer {
    target_root: PathBuf,
    /// Prepended to keys in [`Synchronizer::location_of`]
    location_prefix: Option<String>,
    detector: ChangeDetector,
    retry: RetryPolicy,
    matcher: PatternMatcher,
}

impl DirectorySynchronizer {
    /// Mirror into `target_root`
    pub fn new(target_root: impl Into<PathBuf>, settings: &SyncSettings) -> Self {
        Self {
            target_root: target_root.into(),
            location_prefix: None,
            detector: settings.detector(),
            retry: settings.retry,
            matcher: settings.matcher(),
        }
    }

    /// Write into `<remote>/<syncpointId>/`
    pub fn for_syncpoint(remote_root: &Path, syncpoint_id: &str, settings: &SyncSettings) -> Self {
        Self {
            location_prefix: Some(syncpoint_id.to_string()),
            ..Self::new(remote_root.join(syncpoint_id), settings)
        }
    }

    /// Replace the copy policy
    pub fn with_detector(mut self, detector: ChangeDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Directory receiving the files
    pub fn target_root(&self) -> &Path {
        &self.target_root
    }
}

impl Synchronizer for DirectorySynchronizer {
    fn synchronize_file(
        &self,
        source: &Path,
        destination: &str,
        old_destination: Option<&str>,
    ) -> Result<CopyDecision> {
        if let Some(old) = old_destination {
            let old_path = key_to_path(&self.target_root, old);
            if let Err(e) = fs::remove_file(&old_path) {
                tracing::debug!("Could not remove renamed file {}: {}", old_path.display(), e);
            }
        }

        let dest_path = key_to_path(&self.target_root, destination);
        let stamp = FileStamp::of_file(&dest_path)?;
        let decision = self
            .detector
            .decide(source, stamp, || Ok(sha256_file(&dest_path).ok()))?;

        if decision.needs_copy() {
            copy_with_retry(source, &dest_path, &self.retry)?;
        }
        Ok(decision)
    }

    fn copy_file(&self, source: &Path, destination: &str) -> Result<()> {
        copy_with_retry(source, &key_to_path(&self.target_root, destination), &self.retry)
    }

    fn location_of(&self, destination: &str) -> String {
        match &self.location_prefix {
            Some(prefix) => format!("{prefix}/{destination}"),
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

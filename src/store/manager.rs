// Syncpoint Store
// Owns the syncpoints of one remote root and reconstructs file sets from them

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;

use super::model::{
    EntryType, StoreMode, SyncPoint, SyncPointEntry, SyncPointRoot, LATEST, ROOT_FILE,
    SYNCPOINT_FILE_SUFFIX,
};
use crate::core::SyncSettings;
use crate::error::{Result, SyncError};
use crate::operations::{DirectorySynchronizer, Synchronizer, ZipSynchronizer};

/// Newest-entry-wins compaction over a history ordered newest first.
///
/// The first entry seen for a path decides it. Tombstones are not emitted but
/// still mark their path as seen, so older versions never resurface.
pub fn compact_entries(history_newest_first: &[SyncPoint]) -> Vec<SyncPointEntry> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut result = Vec::new();

    for syncpoint in history_newest_first {
        // Later entries within one syncpoint supersede earlier ones.
        for entry in syncpoint.entries.iter().rev() {
            if !seen.insert(entry.source_path.as_str()) {
                continue;
            }
            if entry.entry_type == EntryType::AddOrChanged {
                result.push(entry.clone());
            }
        }
    }

    result
}

/// Syncpoints of one remote root.
///
/// Not thread-safe: callers serialize access per remote, or open separate
/// stores and [`refresh`](Self::refresh) before each operation.
#[derive(Debug)]
pub struct SyncPointStore {
    remote_path: PathBuf,
    root: Option<SyncPointRoot>,
    /// Newest first
    syncpoints: Vec<SyncPoint>,
}

impl SyncPointStore {
    /// Open the store at `remote_path`.
    ///
    /// With `mode` given, an existing root must agree with it and a missing
    /// root is created. Without `mode`, a missing root leaves the store in a
    /// read-only state that answers every query with empty results.
    pub fn open(remote_path: impl Into<PathBuf>, mode: Option<StoreMode>) -> Result<Self> {
        let remote_path = remote_path.into();
        let root_file = remote_path.join(ROOT_FILE);

        let root = if root_file.is_file() {
            let root = read_root(&root_file)?;
            if let Some(mode) = mode {
                if mode.is_compressed() != root.is_compressed {
                    return Err(SyncError::CompressionMismatch {
                        path: remote_path,
                        stored: root.is_compressed,
                        expected: mode.is_compressed(),
                    });
                }
            }
            Some(root)
        } else if let Some(mode) = mode {
            fs::create_dir_all(&remote_path).map_err(|e| SyncError::io(&remote_path, e))?;
            let root = SyncPointRoot::new(mode);
            write_json(&root_file, &root)?;
            tracing::info!("Initialized {:?} store at {}", mode, remote_path.display());
            Some(root)
        } else {
            tracing::debug!("No store root at {}, opening empty", remote_path.display());
            None
        };

        let mut store = Self {
            remote_path,
            root,
            syncpoints: Vec::new(),
        };
        store.refresh()?;
        Ok(store)
    }

    /// Re-read every syncpoint from disk.
    ///
    /// Only `<id>/<id>.syncpoint.json` is read from each folder; a file that
    /// fails to load is logged and skipped. Syncpoints created at the same
    /// instant keep the order they were committed in, newest first.
    pub fn refresh(&mut self) -> Result<()> {
        self.syncpoints.clear();
        if self.root.is_none() {
            return Ok(());
        }

        let dir_entries =
            fs::read_dir(&self.remote_path).map_err(|e| SyncError::io(&self.remote_path, e))?;

        let mut loaded: Vec<(Option<SystemTime>, SyncPoint)> = Vec::new();
        for dir_entry in dir_entries.flatten() {
            let dir = dir_entry.path();
            let Some(id) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let path = metadata_file(&dir, &id);
            if !path.is_file() {
                continue;
            }
            match read_syncpoint(&path) {
                Ok(syncpoint) if syncpoint.id == id => {
                    let written = fs::metadata(&path).and_then(|m| m.modified()).ok();
                    loaded.push((written, syncpoint));
                }
                Ok(syncpoint) => tracing::warn!(
                    "Skipping {}: it records syncpoint {} but lives in folder {}",
                    path.display(),
                    syncpoint.id,
                    id
                ),
                Err(e) => tracing::warn!("Skipping unreadable syncpoint {}: {}", path.display(), e),
            }
        }

        loaded.sort_by(|(a_written, a), (b_written, b)| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b_written.cmp(a_written))
        });
        self.syncpoints = loaded.into_iter().map(|(_, syncpoint)| syncpoint).collect();

        tracing::debug!(
            "Loaded {} syncpoint(s) from {}",
            self.syncpoints.len(),
            self.remote_path.display()
        );
        Ok(())
    }

    /// Root of the remote store
    pub fn remote_path(&self) -> &Path {
        &self.remote_path
    }

    /// Root descriptor, if the store has been initialized
    pub fn root(&self) -> Option<&SyncPointRoot> {
        self.root.as_ref()
    }

    /// Whether the remote has a root descriptor
    pub fn is_initialized(&self) -> bool {
        self.root.is_some()
    }

    /// Whether file bytes live in zip archives
    pub fn is_compressed(&self) -> bool {
        self.root.as_ref().map(|r| r.is_compressed).unwrap_or(false)
    }

    /// Archive file name of a compressed store
    pub fn zip_filename(&self) -> Option<&str> {
        self.root.as_ref().and_then(|r| r.zip_filename.as_deref())
    }

    /// All syncpoints, newest first
    pub fn syncpoints(&self) -> &[SyncPoint] {
        &self.syncpoints
    }

    /// Newest syncpoint
    pub fn latest(&self) -> Option<&SyncPoint> {
        self.syncpoints.first()
    }

    /// Newest syncpoint flagged as a merge reference
    pub fn latest_reference(&self) -> Option<&SyncPoint> {
        self.syncpoints.iter().find(|s| s.is_reference_point)
    }

    /// Syncpoint by id
    pub fn get(&self, id: &str) -> Option<&SyncPoint> {
        self.syncpoints.iter().find(|s| s.id == id)
    }

    /// Resolve an id, treating empty and `latest` as the newest syncpoint
    pub fn resolve_id(&self, id: &str) -> Result<String> {
        let id = id.trim();
        if id.is_empty() || id.eq_ignore_ascii_case(LATEST) {
            return self
                .latest()
                .map(|s| s.id.clone())
                .ok_or_else(|| SyncError::SyncPointNotFound(LATEST.to_string()));
        }
        self.get(id)
            .map(|s| s.id.clone())
            .ok_or_else(|| SyncError::SyncPointNotFound(id.to_string()))
    }

    /// Folder holding a syncpoint's metadata and, for directory stores, its files
    pub fn syncpoint_dir(&self, id: &str) -> PathBuf {
        self.remote_path.join(id)
    }

    /// Archive of a syncpoint in a compressed store
    pub fn archive_path(&self, id: &str) -> Option<PathBuf> {
        self.zip_filename().map(|name| self.syncpoint_dir(id).join(name))
    }

    /// Start a new syncpoint.
    ///
    /// The returned syncpoint is empty and not yet part of the store; the
    /// caller fills it and hands it to [`commit`](Self::commit).
    pub fn add_syncpoint(
        &self,
        source_path: &Path,
        id: Option<&str>,
        description: Option<&str>,
        is_reference: bool,
    ) -> Result<SyncPoint> {
        if self.root.is_none() {
            return Err(SyncError::Configuration(format!(
                "remote {} has no {}",
                self.remote_path.display(),
                ROOT_FILE
            )));
        }

        let id = match id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => SyncPoint::generate_id(Utc::now()),
        };
        if id.eq_ignore_ascii_case(LATEST) || id.contains(['/', '\\', '@']) {
            return Err(SyncError::Configuration(format!("invalid syncpoint id '{id}'")));
        }

        let dir = self.syncpoint_dir(&id);
        if self.get(&id).is_some() || metadata_file(&dir, &id).exists() {
            return Err(SyncError::DuplicateSyncPoint(id));
        }
        fs::create_dir_all(&dir).map_err(|e| SyncError::io(&dir, e))?;

        let description = match description {
            Some(d) => d.to_string(),
            None => format!("Sync of {}", source_path.display()),
        };

        Ok(SyncPoint::new(id, description, is_reference))
    }

    /// Persist a filled syncpoint, placed by creation time ahead of any it ties with
    pub fn commit(&mut self, syncpoint: &SyncPoint) -> Result<()> {
        if self.get(&syncpoint.id).is_some() {
            return Err(SyncError::DuplicateSyncPoint(syncpoint.id.clone()));
        }
        let dir = self.syncpoint_dir(&syncpoint.id);
        fs::create_dir_all(&dir).map_err(|e| SyncError::io(&dir, e))?;
        write_json(&metadata_file(&dir, &syncpoint.id), syncpoint)?;

        let position = self
            .syncpoints
            .iter()
            .position(|s| s.created_at <= syncpoint.created_at)
            .unwrap_or(self.syncpoints.len());
        self.syncpoints.insert(position, syncpoint.clone());
        tracing::info!(
            "Recorded syncpoint {} with {} entr{}",
            syncpoint.id,
            syncpoint.entries.len(),
            if syncpoint.entries.len() == 1 { "y" } else { "ies" }
        );
        Ok(())
    }

    /// Effective file set at a syncpoint.
    ///
    /// Pure over the loaded syncpoints; order of the result is unspecified.
    pub fn get_file_entries_at(&self, syncpoint_id: &str) -> Result<Vec<SyncPointEntry>> {
        if self.root.is_none() {
            return Ok(Vec::new());
        }
        let index = self.index_of(syncpoint_id)?;
        Ok(compact_entries(&self.syncpoints[index..]))
    }

    /// Newest entry for one path at a syncpoint, tombstones included
    pub fn latest_entry_for(
        &self,
        syncpoint_id: &str,
        source_path: &str,
    ) -> Result<Option<SyncPointEntry>> {
        if self.root.is_none() {
            return Ok(None);
        }
        let index = self.index_of(syncpoint_id)?;
        Ok(self.syncpoints[index..]
            .iter()
            .find_map(|s| s.entry_for(source_path))
            .cloned())
    }

    /// Synchronizer that writes into a syncpoint's storage location
    pub fn synchronizer_for(
        &self,
        syncpoint_id: &str,
        settings: &SyncSettings,
    ) -> Result<Box<dyn Synchronizer>> {
        let root = self.root.as_ref().ok_or_else(|| {
            SyncError::Configuration(format!(
                "remote {} has no {}",
                self.remote_path.display(),
                ROOT_FILE
            ))
        })?;

        match root.mode() {
            StoreMode::Directory => Ok(Box::new(DirectorySynchronizer::for_syncpoint(
                &self.remote_path,
                syncpoint_id,
                settings,
            ))),
            StoreMode::Compressed => {
                let zip_filename = root.zip_filename.clone().ok_or_else(|| {
                    SyncError::Configuration("compressed store without zip_filename".to_string())
                })?;
                Ok(Box::new(ZipSynchronizer::for_syncpoint(
                    &self.remote_path,
                    syncpoint_id,
                    &zip_filename,
                    settings,
                )))
            }
        }
    }

    fn index_of(&self, syncpoint_id: &str) -> Result<usize> {
        let id = self.resolve_id(syncpoint_id)?;
        self.syncpoints
            .iter()
            .position(|s| s.id == id)
            .ok_or(SyncError::SyncPointNotFound(id))
    }
}

fn metadata_file(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}{SYNCPOINT_FILE_SUFFIX}"))
}

fn read_root(path: &Path) -> Result<SyncPointRoot> {
    let content = fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| SyncError::Metadata {
        path: path.to_path_buf(),
        source: e,
    })
}

fn read_syncpoint(path: &Path) -> Result<SyncPoint> {
    let content = fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
    let mut syncpoint: SyncPoint = serde_json::from_str(&content).map_err(|e| SyncError::Metadata {
        path: path.to_path_buf(),
        source: e,
    })?;
    syncpoint.adopt_entries();
    Ok(syncpoint)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value).map_err(|e| SyncError::Metadata {
        path: path.to_path_buf(),
        source: e,
    })?;
    fs::write(path, content).map_err(|e| SyncError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::Duration;
    use tempfile::TempDir;

    fn syncpoint(id: &str, minutes: i64, entries: &[(&str, EntryType)]) -> SyncPoint {
        let mut sp = SyncPoint::new(id, id, false);
        sp.created_at = Utc::now() - Duration::minutes(100) + Duration::minutes(minutes);
        for (path, kind) in entries {
            sp.add_entry(*path, format!("{id}/{path}"), *kind);
        }
        sp
    }

    fn paths(entries: &[SyncPointEntry]) -> Vec<String> {
        let mut paths: Vec<String> = entries.iter().map(|e| e.source_path.clone()).collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_compaction_newest_wins() {
        use EntryType::*;
        let history = vec![
            syncpoint("S3", 3, &[("a.txt", AddOrChanged)]),
            syncpoint("S2", 2, &[("b.txt", Deleted)]),
            syncpoint("S1", 1, &[("a.txt", AddOrChanged), ("b.txt", AddOrChanged), ("c.txt", AddOrChanged)]),
        ];

        let entries = compact_entries(&history);
        assert_eq!(paths(&entries), vec!["a.txt", "c.txt"]);

        let a = entries.iter().find(|e| e.source_path == "a.txt").unwrap();
        assert_eq!(a.owning_syncpoint_id, "S3");
        let c = entries.iter().find(|e| e.source_path == "c.txt").unwrap();
        assert_eq!(c.owning_syncpoint_id, "S1");
    }

    #[test]
    fn test_tombstone_then_readd() {
        use EntryType::*;
        let history = vec![
            syncpoint("S3", 3, &[("a.txt", AddOrChanged)]),
            syncpoint("S2", 2, &[("a.txt", Deleted)]),
            syncpoint("S1", 1, &[("a.txt", AddOrChanged)]),
        ];
        assert_eq!(paths(&compact_entries(&history)), vec!["a.txt"]);
        assert!(compact_entries(&history[1..]).is_empty());
    }

    #[test]
    fn test_open_without_mode_and_without_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = SyncPointStore::open(dir.path().join("remote"), None).unwrap();
        assert!(!store.is_initialized());
        assert!(store.get_file_entries_at("latest").unwrap().is_empty());
        assert!(!dir.path().join("remote").exists());

        let err = store
            .add_syncpoint(dir.path(), Some("X"), None, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_compression_mismatch_is_fatal() {
        let dir = TempDir::new().unwrap();
        SyncPointStore::open(dir.path(), Some(StoreMode::Compressed)).unwrap();

        let err = SyncPointStore::open(dir.path(), Some(StoreMode::Directory)).unwrap_err();
        assert!(matches!(err, SyncError::CompressionMismatch { stored: true, .. }));

        let reopened = SyncPointStore::open(dir.path(), None).unwrap();
        assert!(reopened.is_compressed());
        assert!(reopened.zip_filename().is_some());
    }

    #[test]
    fn test_commit_persists_and_orders_newest_first() {
        let dir = TempDir::new().unwrap();
        let mut store = SyncPointStore::open(dir.path(), Some(StoreMode::Directory)).unwrap();

        let mut first = store
            .add_syncpoint(dir.path(), Some("A"), Some("first"), true)
            .unwrap();
        first.add_entry("x.txt", "A/x.txt", EntryType::AddOrChanged);
        store.commit(&first).unwrap();

        let mut second = store.add_syncpoint(dir.path(), Some("B"), None, false).unwrap();
        second.add_entry("x.txt", "B/x.txt", EntryType::Deleted);
        store.commit(&second).unwrap();

        assert!(dir.path().join("A").join("A.syncpoint.json").is_file());
        assert_eq!(store.latest().unwrap().id, "B");
        assert_eq!(store.latest_reference().unwrap().id, "A");

        let mut reopened = SyncPointStore::open(dir.path(), None).unwrap();
        reopened.refresh().unwrap();
        let ids: Vec<&str> = reopened.syncpoints().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A"]);
        assert!(reopened.get_file_entries_at("B").unwrap().is_empty());
        assert_eq!(paths(&reopened.get_file_entries_at("A").unwrap()), vec!["x.txt"]);

        let tombstone = reopened.latest_entry_for("latest", "x.txt").unwrap().unwrap();
        assert!(tombstone.is_tombstone());
        assert_eq!(tombstone.owning_syncpoint_id, "B");
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = SyncPointStore::open(dir.path(), Some(StoreMode::Directory)).unwrap();
        let sp = store.add_syncpoint(dir.path(), Some("SAME"), None, false).unwrap();
        store.commit(&sp).unwrap();

        let err = store.add_syncpoint(dir.path(), Some("SAME"), None, false).unwrap_err();
        assert!(matches!(err, SyncError::DuplicateSyncPoint(id) if id == "SAME"));
    }

    #[test]
    fn test_unknown_syncpoint_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = SyncPointStore::open(dir.path(), Some(StoreMode::Directory)).unwrap();
        assert_eq!(
            store.get_file_entries_at("nope").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(store.resolve_id("latest").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_corrupt_syncpoint_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut store = SyncPointStore::open(dir.path(), Some(StoreMode::Directory)).unwrap();
        let sp = store.add_syncpoint(dir.path(), Some("GOOD"), None, false).unwrap();
        store.commit(&sp).unwrap();

        fs::create_dir_all(dir.path().join("BAD")).unwrap();
        fs::write(dir.path().join("BAD").join("BAD.syncpoint.json"), "{ not json").unwrap();

        store.refresh().unwrap();
        assert_eq!(store.syncpoints().len(), 1);
        assert_eq!(store.latest().unwrap().id, "GOOD");
    }

    #[test]
    fn test_only_the_folder_metadata_file_is_loaded() {
        let dir = TempDir::new().unwrap();
        let mut store = SyncPointStore::open(dir.path(), Some(StoreMode::Directory)).unwrap();
        let sp = store.add_syncpoint(dir.path(), Some("S1"), None, false).unwrap();
        store.commit(&sp).unwrap();

        // A user file stored inside the syncpoint folder that looks like metadata
        let lookalike = syncpoint("PHANTOM", 99, &[("x.txt", EntryType::AddOrChanged)]);
        write_json(&dir.path().join("S1").join("backup.syncpoint.json"), &lookalike).unwrap();
        // Metadata copied into a folder of another name
        fs::create_dir_all(dir.path().join("COPY")).unwrap();
        write_json(&dir.path().join("COPY").join("COPY.syncpoint.json"), &lookalike).unwrap();

        store.refresh().unwrap();
        let ids: Vec<&str> = store.syncpoints().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["S1"]);
    }

    #[test]
    fn test_ties_keep_commit_order() {
        let dir = TempDir::new().unwrap();
        let mut store = SyncPointStore::open(dir.path(), Some(StoreMode::Directory)).unwrap();
        let created = Utc::now();

        let mut first = store.add_syncpoint(dir.path(), Some("Z"), None, false).unwrap();
        first.created_at = created;
        store.commit(&first).unwrap();
        let mut second = store.add_syncpoint(dir.path(), Some("A"), None, false).unwrap();
        second.created_at = created;
        store.commit(&second).unwrap();

        let ids: Vec<&str> = store.syncpoints().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "Z"]);

        let stamp = |id: &str, secs: i64| {
            let file = dir.path().join(id).join(format!("{id}{SYNCPOINT_FILE_SUFFIX}"));
            filetime::set_file_mtime(file, filetime::FileTime::from_unix_time(secs, 0)).unwrap();
        };
        stamp("Z", 1_700_000_000);
        stamp("A", 1_700_000_100);
        store.refresh().unwrap();
        let ids: Vec<&str> = store.syncpoints().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "Z"]);
    }

    #[test]
    fn test_entries_are_deterministic() {
        use EntryType::*;
        let dir = TempDir::new().unwrap();
        let mut store = SyncPointStore::open(dir.path(), Some(StoreMode::Directory)).unwrap();
        let mut sp = store.add_syncpoint(dir.path(), Some("S1"), None, false).unwrap();
        sp.add_entry("a.txt", "S1/a.txt", AddOrChanged);
        sp.add_entry("b.txt", "S1/b.txt", AddOrChanged);
        store.commit(&sp).unwrap();

        let first = paths(&store.get_file_entries_at("S1").unwrap());
        let second = paths(&store.get_file_entries_at("S1").unwrap());
        assert_eq!(first, second);
        assert_eq!(store.syncpoints()[0].entries.len(), 2);
    }
}

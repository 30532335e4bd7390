// Restorer
// Rewrites a working directory to match the file set of one syncpoint

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use super::archive::{entry_stamp_in, extract_entry, open_archive};
use super::detector::FileStamp;
use super::sync::{collect_files, copy_with_retry};
use crate::core::{Reporter, SyncSettings};
use crate::error::{ErrorKind, Result, SyncError};
use crate::store::{content, StoredLocation, SyncPointEntry, SyncPointStore};
use crate::utilities::key_to_path;

/// What a restore did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Syncpoint that was restored
    pub syncpoint_id: String,
    /// Files copied or extracted
    pub restored: usize,
    /// Files that already matched
    pub unchanged: usize,
    /// Working files removed because the syncpoint does not contain them
    pub deleted: usize,
    /// `(relative path, error)` for files that could not be restored or removed
    pub failures: Vec<(String, String)>,
}

impl RestoreSummary {
    /// Whether every file was handled
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Restores syncpoints of one store
pub struct Restorer<'a> {
    store: &'a SyncPointStore,
    settings: &'a SyncSettings,
}

impl<'a> Restorer<'a> {
    pub fn new(store: &'a SyncPointStore, settings: &'a SyncSettings) -> Self {
        Self { store, settings }
    }

    /// Restore `syncpoint_id` (empty or `latest` for the newest) into `working_dir`.
    ///
    /// A full restore deletes every working file the syncpoint does not
    /// contain. Files that cannot be written or removed are reported and
    /// listed in the summary; an unreadable archive aborts the restore. With `single_file`, only that path is restored and nothing is
    /// deleted; a tombstoned path is reported and left alone.
    pub fn restore(
        &self,
        working_dir: &Path,
        syncpoint_id: &str,
        single_file: Option<&str>,
        reporter: &dyn Reporter,
    ) -> Result<RestoreSummary> {
        if !self.store.is_initialized() {
            return Err(SyncError::Configuration(format!(
                "remote {} is not initialized",
                self.store.remote_path().display()
            )));
        }
        let id = self.store.resolve_id(syncpoint_id)?;
        fs::create_dir_all(working_dir).map_err(|e| SyncError::io(working_dir, e))?;

        let mut summary = RestoreSummary {
            syncpoint_id: id.clone(),
            ..RestoreSummary::default()
        };
        let mut archives = HashMap::new();

        if let Some(file) = single_file {
            let key = file.replace('\\', "/");
            let key = key.trim_start_matches("./");
            let entry = self.store.latest_entry_for(&id, key)?.ok_or_else(|| {
                SyncError::EntryNotFound {
                    archive: self.store.syncpoint_dir(&id),
                    entry: key.to_string(),
                }
            })?;

            if entry.is_tombstone() {
                reporter.message(
                    &format!("{key} was deleted at syncpoint {id}; run a full restore to bring it back"),
                    None,
                );
                return Ok(summary);
            }

            if self.restore_entry(&entry, working_dir, &mut archives)? {
                summary.restored += 1;
            } else {
                summary.unchanged += 1;
            }
            reporter.progress(1, 1, key);
            return Ok(summary);
        }

        let mut entries = self.store.get_file_entries_at(&id)?;
        entries.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        let total = entries.len();

        for (index, entry) in entries.iter().enumerate() {
            match self.restore_entry(entry, working_dir, &mut archives) {
                Ok(true) => {
                    tracing::debug!("{}: restored", entry.source_path);
                    summary.restored += 1;
                }
                Ok(false) => summary.unchanged += 1,
                Err(e) if e.kind() == ErrorKind::Integrity => return Err(e),
                Err(e) => {
                    reporter.error(&format!("Could not restore {}", entry.source_path), &e);
                    summary.failures.push((entry.source_path.clone(), e.to_string()));
                }
            }
            reporter.progress(index + 1, total, &entry.source_path);
        }

        let wanted: HashSet<&str> = entries.iter().map(|e| e.source_path.as_str()).collect();
        for (path, key) in collect_files(working_dir, &self.settings.matcher())? {
            if wanted.contains(key.as_str()) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!("{}: deleted", key);
                    summary.deleted += 1;
                    prune_empty_parents(working_dir, &path);
                }
                Err(e) => {
                    reporter.error(&format!("Could not delete {key}"), &e);
                    summary.failures.push((key, e.to_string()));
                }
            }
        }

        tracing::info!(
            "Restored {} to {}: {} written, {} unchanged, {} deleted",
            id,
            working_dir.display(),
            summary.restored,
            summary.unchanged,
            summary.deleted
        );
        Ok(summary)
    }

    /// Bring one working file in line with its entry; returns whether bytes were written
    fn restore_entry(
        &self,
        entry: &SyncPointEntry,
        working_dir: &Path,
        archives: &mut HashMap<PathBuf, ZipArchive<File>>,
    ) -> Result<bool> {
        let destination = key_to_path(working_dir, &entry.source_path);
        let current = FileStamp::of_file(&destination)?;

        match content::locate(self.store, entry)? {
            StoredLocation::File(stored) => {
                let stamp = FileStamp::of_file(&stored)?
                    .ok_or_else(|| SyncError::PathNotFound(stored.clone()))?;
                if current.is_some_and(|c| c.matches(&stamp)) {
                    return Ok(false);
                }
                copy_with_retry(&stored, &destination, &self.settings.retry)?;
            }
            StoredLocation::Archive { archive, address } => {
                let zip = match archives.entry(archive.clone()) {
                    Entry::Occupied(open) => open.into_mut(),
                    Entry::Vacant(slot) => slot.insert(open_archive(&archive)?),
                };
                let name = address.relative_path.as_str();
                let stamp = entry_stamp_in(zip, &archive, name)?.ok_or_else(|| {
                    SyncError::EntryNotFound {
                        archive: archive.clone(),
                        entry: name.to_string(),
                    }
                })?;
                if current.is_some_and(|c| c.matches(&stamp)) {
                    return Ok(false);
                }
                extract_entry(zip, &archive, name, &destination, &self.settings.retry)?;
            }
        }
        Ok(true)
    }
}

/// Remove the folders above a deleted file that it left empty
fn prune_empty_parents(working_dir: &Path, deleted: &Path) {
    let mut dir = deleted.parent();
    while let Some(current) = dir {
        if current == working_dir || !current.starts_with(working_dir) {
            break;
        }
        if fs::remove_dir(current).is_err() {
            break;
        }
        tracing::debug!("Removed empty folder {}", current.display());
        dir = current.parent();
    }
}

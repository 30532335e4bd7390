// Tree Merge
// File-level merge of one working copy into another

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::merge::{ConflictKind, MergeConflict, MergePolicy, MergeResult, Merger};
use super::sync::{collect_files, copy_with_retry};
use crate::core::{Reporter, SyncSettings};
use crate::error::{Result, SyncError};
use crate::store::{content, SyncPointEntry, SyncPointStore};
use crate::utilities::key_to_path;

/// Common ancestor of a merge: the file set of one reference syncpoint
pub struct MergeBase<'a> {
    store: &'a SyncPointStore,
    syncpoint_id: String,
    entries: HashMap<String, SyncPointEntry>,
}

impl<'a> MergeBase<'a> {
    /// File set of `syncpoint_id` in `store`
    pub fn at(store: &'a SyncPointStore, syncpoint_id: &str) -> Result<Self> {
        let syncpoint_id = store.resolve_id(syncpoint_id)?;
        let entries = store
            .get_file_entries_at(&syncpoint_id)?
            .into_iter()
            .map(|e| (e.source_path.clone(), e))
            .collect();
        Ok(Self {
            store,
            syncpoint_id,
            entries,
        })
    }

    /// Syncpoint used as the base
    pub fn syncpoint_id(&self) -> &str {
        &self.syncpoint_id
    }

    /// Content of a path at the base, `None` when the base lacks it
    pub fn content(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.entries.get(key) {
            Some(entry) => content::read_entry(self.store, entry).map(Some),
            None => Ok(None),
        }
    }
}

/// How one file was merged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileMergeOutcome {
    /// Target did not have the file
    Copied,
    /// Files were already identical
    Unchanged,
    /// Binary file replaced by the source
    Overwritten,
    /// Text merged without conflicts
    Merged,
    /// Text merged with conflict markers left in the target
    Conflicted(Vec<MergeConflict>),
}

/// Result of merging a whole tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeMergeReport {
    pub copied: usize,
    pub unchanged: usize,
    pub overwritten: usize,
    pub merged: usize,
    /// Files left with conflict markers, with their conflicts
    pub conflicts: Vec<(String, Vec<MergeConflict>)>,
    /// `(relative path, error)` for files that could not be merged
    pub failures: Vec<(String, String)>,
}

impl TreeMergeReport {
    /// No conflicts and no failures
    pub fn succeeded(&self) -> bool {
        self.conflicts.is_empty() && self.failures.is_empty()
    }

    fn record(&mut self, key: String, outcome: FileMergeOutcome) {
        match outcome {
            FileMergeOutcome::Copied => self.copied += 1,
            FileMergeOutcome::Unchanged => self.unchanged += 1,
            FileMergeOutcome::Overwritten => self.overwritten += 1,
            FileMergeOutcome::Merged => self.merged += 1,
            FileMergeOutcome::Conflicted(conflicts) => self.conflicts.push((key, conflicts)),
        }
    }
}

/// Merges every file of a source tree into a target tree.
///
/// Text files merge three-way when a base is set and has the file, two-way
/// otherwise. Other files are overwritten by the source when they differ.
/// Files only the target has are left alone.
pub struct TreeMerger<'a> {
    settings: &'a SyncSettings,
    merger: Merger,
    base: Option<MergeBase<'a>>,
}

impl<'a> TreeMerger<'a> {
    pub fn new(settings: &'a SyncSettings) -> Self {
        Self {
            settings,
            merger: Merger::from_settings(settings),
            base: None,
        }
    }

    /// Use a common ancestor for three-way merges
    pub fn with_base(mut self, base: MergeBase<'a>) -> Self {
        self.base = Some(base);
        self
    }

    /// Merge `source_root` into `target_root`.
    ///
    /// Per-file failures are reported and collected; only a failure to walk
    /// the source tree aborts the merge.
    pub fn merge(
        &self,
        source_root: &Path,
        target_root: &Path,
        reporter: &dyn Reporter,
    ) -> Result<TreeMergeReport> {
        let files = collect_files(source_root, &self.settings.matcher())?;
        let total = files.len();
        let mut report = TreeMergeReport::default();

        for (index, (source, key)) in files.into_iter().enumerate() {
            let target = key_to_path(target_root, &key);
            match self.merge_file(&source, &target, &key) {
                Ok(outcome) => {
                    tracing::debug!("{}: {:?}", key, outcome);
                    reporter.progress(index + 1, total, &key);
                    report.record(key, outcome);
                }
                Err(e) => {
                    reporter.error(&format!("Could not merge {key}"), &e);
                    reporter.progress(index + 1, total, &key);
                    report.failures.push((key, e.to_string()));
                }
            }
        }

        for (key, conflicts) in &report.conflicts {
            reporter.message(
                &format!("{} conflict(s) left in {}", conflicts.len(), key),
                None,
            );
        }
        Ok(report)
    }

    fn merge_file(&self, source: &Path, target: &Path, key: &str) -> Result<FileMergeOutcome> {
        if !target.is_file() {
            copy_with_retry(source, target, &self.settings.retry)?;
            return Ok(FileMergeOutcome::Copied);
        }

        let source_bytes = fs::read(source).map_err(|e| SyncError::io(source, e))?;
        let target_bytes = fs::read(target).map_err(|e| SyncError::io(target, e))?;
        if source_bytes == target_bytes {
            return Ok(FileMergeOutcome::Unchanged);
        }

        let texts = match (String::from_utf8(source_bytes), String::from_utf8(target_bytes)) {
            (Ok(s), Ok(t)) if self.settings.is_text_file(source) => Some((s, t)),
            _ => None,
        };
        let Some((source_text, target_text)) = texts else {
            copy_with_retry(source, target, &self.settings.retry)?;
            return Ok(FileMergeOutcome::Overwritten);
        };

        let result = self.merge_text(key, &source_text, &target_text)?;
        if result.merged_text != target_text {
            let retry = &self.settings.retry;
            retry.run(target, || fs::write(target, result.merged_text.as_bytes()))?;
        }

        if result.fully_auto_merged() {
            Ok(FileMergeOutcome::Merged)
        } else {
            Ok(FileMergeOutcome::Conflicted(result.conflicts))
        }
    }

    fn merge_text(&self, key: &str, source: &str, target: &str) -> Result<MergeResult> {
        let Some(base) = &self.base else {
            return Ok(self.merger.two_way(source, target, MergePolicy::SourceWins));
        };

        let base_text = base
            .content(key)?
            .and_then(|bytes| String::from_utf8(bytes).ok());
        match base_text {
            Some(base_text) => Ok(self.merger.three_way(&base_text, source, target)),
            None => {
                // Added on both sides since the base
                let mut result = self.merger.two_way(source, target, MergePolicy::Union);
                for conflict in &mut result.conflicts {
                    conflict.kind = ConflictKind::AddVsAdd;
                }
                Ok(result)
            }
        }
    }
}

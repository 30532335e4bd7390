// Workflows
// Repository-to-repository merge and one-off manual synchronization

use std::path::Path;

use chrono::Utc;

use super::local::LocalRepository;
use crate::core::{Reporter, SyncSettings};
use crate::error::{Result, SyncError};
use crate::operations::{
    ChangeDetector, DirectorySynchronizer, MergeBase, Recording, SyncSummary, Synchronizer,
    TreeMerger, ZipSynchronizer,
};
use crate::store::{StoreMode, SyncPoint, SyncPointStore};
use crate::utilities::paths::extension_lower;

/// Prefix of the recovery syncpoints pushed before a merge
pub const PREMERGE_PREFIX: &str = "PREMERGE-";

/// Prefix of the syncpoints pushed after a successful merge
pub const POSTMERGE_PREFIX: &str = "POSTMERGE-";

/// Newest syncpoint both stores share that can serve as a merge base.
///
/// Candidates come from `source`, newest first. A candidate qualifies when
/// `target` has a syncpoint with the same id and either side flags it as a
/// reference. Pre-merge recovery points never qualify.
pub fn find_common_reference(source: &SyncPointStore, target: &SyncPointStore) -> Option<String> {
    source
        .syncpoints()
        .iter()
        .filter(|s| !s.id.starts_with(PREMERGE_PREFIX))
        .find(|s| {
            target
                .get(&s.id)
                .is_some_and(|t| s.is_reference_point || t.is_reference_point)
        })
        .map(|s| s.id.clone())
}

/// Merge the working copy of `source` into `target`.
///
/// Both sides first get a `PREMERGE-<stamp>` recovery syncpoint. Files are
/// then merged three-way against the newest common reference, or two-way with
/// the source winning when there is none. Returns `false` when conflicts or
/// failures were left in the target; the operator resolves them and runs the
/// merge again. On success the target is pushed as `POSTMERGE-<stamp>`,
/// mirrored back into the source, and the source is pushed under the same id.
pub fn merge(
    source: &mut LocalRepository,
    target: &mut LocalRepository,
    reporter: &dyn Reporter,
) -> Result<bool> {
    let stamp = SyncPoint::generate_id(Utc::now());

    let premerge = format!("{PREMERGE_PREFIX}{stamp}");
    let description = format!("Before merging {}", source.root().display());
    source.push(Some(&premerge), Some(&description), true, reporter)?;
    target.push(Some(&premerge), Some(&description), true, reporter)?;

    let base_id = find_common_reference(source.store(), target.store());
    let report = {
        let mut merger = TreeMerger::new(target.settings());
        match &base_id {
            Some(id) => {
                tracing::info!("Three-way merge against {}", id);
                merger = merger.with_base(MergeBase::at(target.store(), id)?);
            }
            None => {
                reporter.message(
                    "No common reference syncpoint, merging two-way with the source winning",
                    None,
                );
            }
        }
        merger.merge(source.root(), target.root(), reporter)?
    };

    if !report.succeeded() {
        reporter.message(
            &format!(
                "Merge stopped: {} file(s) with conflicts, {} failure(s). Resolve the markers in {} and merge again",
                report.conflicts.len(),
                report.failures.len(),
                target.root().display()
            ),
            None,
        );
        return Ok(false);
    }

    let postmerge = format!("{POSTMERGE_PREFIX}{stamp}");
    let description = format!("Merged {}", source.root().display());
    target.push(Some(&postmerge), Some(&description), true, reporter)?;

    let back = DirectorySynchronizer::new(source.root(), target.settings())
        .with_detector(ChangeDetector::strict());
    back.full_synchronization(target.root(), None, reporter)?;

    source.push(Some(&postmerge), Some(&description), true, reporter)?;

    reporter.message(
        &format!(
            "Merge complete: {} merged, {} copied, {} overwritten",
            report.merged, report.copied, report.overwritten
        ),
        None,
    );
    Ok(true)
}

/// Synchronize `from` into `to` once.
///
/// With `record_syncpoint`, `to` is a store root and a syncpoint is recorded
/// (a missing store is created as a directory store). Otherwise `to` is
/// mirrored 1:1: a path with a `zip` extension is treated as an archive,
/// anything else as a directory.
pub fn manual_sync(
    from: &Path,
    to: &Path,
    record_syncpoint: bool,
    id: Option<&str>,
    description: Option<&str>,
    settings: &SyncSettings,
    reporter: &dyn Reporter,
) -> Result<SyncSummary> {
    let is_archive = extension_lower(to).is_some_and(|ext| ext == "zip");

    if !record_syncpoint {
        let summary = if is_archive {
            ZipSynchronizer::new(to, settings).full_synchronization(from, None, reporter)?
        } else {
            DirectorySynchronizer::new(to, settings).full_synchronization(from, None, reporter)?
        };
        reporter.message(
            &format!(
                "Synchronized {} into {}: {} copied, {} unchanged",
                from.display(),
                to.display(),
                summary.copied(),
                summary.unchanged
            ),
            None,
        );
        return Ok(summary);
    }

    if is_archive {
        return Err(SyncError::Configuration(format!(
            "syncpoints are recorded into a store folder, not an archive: {}",
            to.display()
        )));
    }

    let mut store = SyncPointStore::open(to, None)?;
    if !store.is_initialized() {
        store = SyncPointStore::open(to, Some(StoreMode::Directory))?;
    }
    let mut syncpoint = store.add_syncpoint(from, id, description, false)?;
    let sync = store.synchronizer_for(&syncpoint.id, settings)?;
    let summary = sync.full_synchronization(
        from,
        Some(Recording {
            store: &mut store,
            syncpoint: &mut syncpoint,
        }),
        reporter,
    )?;

    reporter.message(
        &format!(
            "Recorded syncpoint {} in {}: {} stored, {} deleted",
            syncpoint.id,
            to.display(),
            summary.copied(),
            summary.deleted
        ),
        None,
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MemoryReporter;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, key: &str, content: &str) {
        let path = root.join(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn quick(mut repo: LocalRepository) -> LocalRepository {
        repo.settings_mut().retry.delay_ms = 0;
        repo
    }

    #[test]
    fn test_common_reference_skips_premerge() {
        let dir = TempDir::new().unwrap();
        let reporter = MemoryReporter::new();
        let a_local = dir.path().join("a");
        write(&a_local, "f.txt", "x");
        let mut a = quick(LocalRepository::initialize(&a_local, &dir.path().join("ra"), None, &reporter).unwrap());
        let mut b = quick(
            LocalRepository::clone_from(&dir.path().join("ra"), &dir.path().join("b"), &dir.path().join("rb"), None, &reporter)
                .unwrap(),
        );
        assert_eq!(
            find_common_reference(a.store(), b.store()).as_deref(),
            Some("INIT")
        );

        a.push(Some("PREMERGE-X"), None, true, &reporter).unwrap();
        b.push(Some("PREMERGE-X"), None, true, &reporter).unwrap();
        assert_eq!(
            find_common_reference(a.store(), b.store()).as_deref(),
            Some("INIT")
        );
    }

    #[test]
    fn test_manual_sync_straight_and_recorded() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("from");
        write(&from, "a.txt", "a");
        write(&from, "sub/b.txt", "b");
        let mut settings = SyncSettings::default();
        settings.retry.delay_ms = 0;
        let reporter = MemoryReporter::new();

        let mirror = dir.path().join("mirror");
        let summary = manual_sync(&from, &mirror, false, None, None, &settings, &reporter).unwrap();
        assert_eq!(summary.created, 2);
        assert!(mirror.join("sub/b.txt").is_file());

        let archive = dir.path().join("mirror.zip");
        manual_sync(&from, &archive, false, None, None, &settings, &reporter).unwrap();
        assert!(archive.is_file());

        let store_root = dir.path().join("store");
        let summary = manual_sync(&from, &store_root, true, Some("M1"), Some("manual"), &settings, &reporter)
            .unwrap();
        assert_eq!(summary.syncpoint_id.as_deref(), Some("M1"));
        let store = SyncPointStore::open(&store_root, None).unwrap();
        assert_eq!(store.get("M1").unwrap().description, "manual");

        let err = manual_sync(&from, &archive, true, None, None, &settings, &reporter).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}

// Local Repository
// A working copy bound to a remote store: init, push, restore and clone

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::{RemoteConfig, Reporter, SyncSettings};
use crate::error::{Result, SyncError};
use crate::operations::{collect_files, Recording, RestoreSummary, Restorer};
use crate::store::{StoreMode, SyncPoint, SyncPointStore};
use crate::utilities::is_inside;

/// Id of the first syncpoint pushed from a populated working copy
pub const INIT_SYNCPOINT_ID: &str = "INIT";

/// A working copy and the remote store it pushes to
#[derive(Debug)]
pub struct LocalRepository {
    root: PathBuf,
    config: RemoteConfig,
    settings: SyncSettings,
    store: SyncPointStore,
}

impl LocalRepository {
    /// Bind `local` to `remote`.
    ///
    /// A remote that already has syncpoints wins: its latest syncpoint is
    /// restored over the working copy. An empty remote receives an `INIT`
    /// reference syncpoint when the working copy has files.
    ///
    /// `mode` is used when the remote has no store yet; an existing store must
    /// agree with it. Without a mode a new store is a directory store.
    pub fn initialize(
        local: &Path,
        remote: &Path,
        mode: Option<StoreMode>,
        reporter: &dyn Reporter,
    ) -> Result<Self> {
        ensure_outside(local, remote)?;
        fs::create_dir_all(local).map_err(|e| SyncError::io(local, e))?;
        let settings = SyncSettings::load_for_working_copy(local)?;
        let store = open_or_create(remote, mode)?;

        let mut repo = Self {
            root: local.to_path_buf(),
            config: RemoteConfig::new(remote),
            settings,
            store,
        };
        repo.config.save(&repo.root)?;

        if let Some(latest) = repo.store.latest() {
            let id = latest.id.clone();
            tracing::info!("Remote {} has history, restoring {}", remote.display(), id);
            let restored = repo.restore(&id, None, reporter)?;
            if !restored.succeeded() {
                return Err(SyncError::IncompleteRestore {
                    syncpoint: id,
                    failed: restored.failures.len(),
                });
            }
        } else if !collect_files(&repo.root, &repo.settings.matcher())?.is_empty() {
            repo.push(
                Some(INIT_SYNCPOINT_ID),
                Some("Initial syncpoint"),
                true,
                reporter,
            )?;
        }

        reporter.message(
            &format!("Initialized {} with remote {}", local.display(), remote.display()),
            None,
        );
        Ok(repo)
    }

    /// Re-open a working copy bound by [`initialize`](Self::initialize)
    pub fn open(local: &Path) -> Result<Self> {
        let config = RemoteConfig::load(local)?;
        let settings = SyncSettings::load_for_working_copy(local)?;
        let store = SyncPointStore::open(&config.remote_path, None)?;
        Ok(Self {
            root: local.to_path_buf(),
            config,
            settings,
            store,
        })
    }

    /// Clone the latest syncpoint of `source_remote` into a new pair.
    ///
    /// The new remote receives a reference syncpoint with the same id as the
    /// source's latest, which later serves as a common merge base.
    pub fn clone_from(
        source_remote: &Path,
        local: &Path,
        remote: &Path,
        mode: Option<StoreMode>,
        reporter: &dyn Reporter,
    ) -> Result<Self> {
        ensure_outside(local, remote)?;
        let source = SyncPointStore::open(source_remote, None)?;
        let latest = source.latest().ok_or_else(|| {
            SyncError::Configuration(format!(
                "remote {} has no syncpoints to clone",
                source_remote.display()
            ))
        })?;
        let id = latest.id.clone();
        let description = format!("Clone of {} at {}", source_remote.display(), id);

        let mode = mode.or_else(|| source.root().map(|r| r.mode()));
        let store = open_or_create(remote, mode)?;
        if store.latest().is_some() {
            return Err(SyncError::Configuration(format!(
                "clone destination {} already has syncpoints",
                remote.display()
            )));
        }

        fs::create_dir_all(local).map_err(|e| SyncError::io(local, e))?;
        let settings = SyncSettings::load_for_working_copy(local)?;
        let restored = Restorer::new(&source, &settings).restore(local, &id, None, reporter)?;
        if !restored.succeeded() {
            return Err(SyncError::IncompleteRestore {
                syncpoint: id,
                failed: restored.failures.len(),
            });
        }

        let mut repo = Self {
            root: local.to_path_buf(),
            config: RemoteConfig::new(remote),
            settings,
            store,
        };
        repo.push(Some(&id), Some(&description), true, reporter)?;
        reporter.message(&format!("Cloned {} at {}", source_remote.display(), id), None);
        Ok(repo)
    }

    /// Point the working copy at another remote
    pub fn set_remote(&mut self, remote: &Path, mode: Option<StoreMode>) -> Result<()> {
        ensure_outside(&self.root, remote)?;
        self.store = open_or_create(remote, mode)?;
        self.config = RemoteConfig::new(remote);
        self.config.save(&self.root)
    }

    /// Record a syncpoint of the working copy in the remote
    pub fn push(
        &mut self,
        id: Option<&str>,
        description: Option<&str>,
        is_reference: bool,
        reporter: &dyn Reporter,
    ) -> Result<SyncPoint> {
        self.store.refresh()?;
        let mut syncpoint = self
            .store
            .add_syncpoint(&self.root, id, description, is_reference)?;
        let sync = self.store.synchronizer_for(&syncpoint.id, &self.settings)?;

        let summary = sync.full_synchronization(
            &self.root,
            Some(Recording {
                store: &mut self.store,
                syncpoint: &mut syncpoint,
            }),
            reporter,
        )?;
        self.store.refresh()?;

        self.config.current_syncpoint_id = Some(syncpoint.id.clone());
        self.config.save(&self.root)?;

        reporter.message(
            &format!(
                "Pushed syncpoint {}: {} stored, {} unchanged, {} deleted",
                syncpoint.id,
                summary.copied(),
                summary.unchanged,
                summary.deleted
            ),
            None,
        );
        Ok(syncpoint)
    }

    /// Restore a syncpoint (empty or `latest` for the newest) into the working copy
    pub fn restore(
        &mut self,
        syncpoint_id: &str,
        single_file: Option<&str>,
        reporter: &dyn Reporter,
    ) -> Result<RestoreSummary> {
        self.store.refresh()?;
        let summary = Restorer::new(&self.store, &self.settings).restore(
            &self.root,
            syncpoint_id,
            single_file,
            reporter,
        )?;

        if single_file.is_none() {
            self.config.current_syncpoint_id = Some(summary.syncpoint_id.clone());
            self.config.save(&self.root)?;
        }
        for (path, error) in &summary.failures {
            tracing::warn!("Restore could not handle {}: {}", path, error);
        }
        Ok(summary)
    }

    /// Working copy root
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Store of the bound remote
    pub fn store(&self) -> &SyncPointStore {
        &self.store
    }

    /// Settings used by later operations; not persisted
    pub fn settings_mut(&mut self) -> &mut SyncSettings {
        &mut self.settings
    }
}

/// A remote inside its own working copy would be pushed into itself
fn ensure_outside(local: &Path, remote: &Path) -> Result<()> {
    if is_inside(remote, local) {
        return Err(SyncError::Configuration(format!(
            "remote {} lies inside working copy {}",
            remote.display(),
            local.display()
        )));
    }
    Ok(())
}

/// Open a remote store, creating its root when missing
fn open_or_create(remote: &Path, mode: Option<StoreMode>) -> Result<SyncPointStore> {
    let store = SyncPointStore::open(remote, mode)?;
    if store.is_initialized() {
        return Ok(store);
    }
    SyncPointStore::open(remote, Some(StoreMode::Directory))
}

// Syncpoint Model
// Persisted root descriptor, syncpoints and their entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Root descriptor file at the top of every remote store
pub const ROOT_FILE: &str = "syncpointroot.json";

/// Suffix of the per-syncpoint metadata file
pub const SYNCPOINT_FILE_SUFFIX: &str = ".syncpoint.json";

/// chrono format of generated syncpoint ids
pub const ID_FORMAT: &str = "%Y%m%d%H%M%SUTC";

/// Alias accepted wherever a syncpoint id is expected
pub const LATEST: &str = "latest";

/// How a remote store keeps file bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Plain files under `<syncpointId>/<relativePath>`
    Directory,
    /// One zip archive per syncpoint
    Compressed,
}

impl StoreMode {
    /// Mode from the persisted flag
    pub fn from_compressed(is_compressed: bool) -> Self {
        if is_compressed {
            StoreMode::Compressed
        } else {
            StoreMode::Directory
        }
    }

    /// Persisted flag for this mode
    pub fn is_compressed(&self) -> bool {
        matches!(self, StoreMode::Compressed)
    }
}

/// Contents of `syncpointroot.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncPointRoot {
    /// Unique id of this store
    pub root_id: String,
    /// Whether file bytes live in zip archives
    pub is_compressed: bool,
    /// Archive file name used by every syncpoint, set iff compressed
    #[serde(default)]
    pub zip_filename: Option<String>,
}

impl SyncPointRoot {
    /// New descriptor with a fresh id
    pub fn new(mode: StoreMode) -> Self {
        let root_id = uuid::Uuid::new_v4().to_string();
        let zip_filename = mode
            .is_compressed()
            .then(|| format!("syncpoint-{}.zip", &root_id[..8]));
        Self {
            root_id,
            is_compressed: mode.is_compressed(),
            zip_filename,
        }
    }

    /// Mode of this store
    pub fn mode(&self) -> StoreMode {
        StoreMode::from_compressed(self.is_compressed)
    }
}

/// State of one file within one syncpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// File was added or changed; bytes were stored by the owning syncpoint
    AddOrChanged,
    /// Tombstone: file was removed from the working copy
    Deleted,
}

/// One file's state within one syncpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPointEntry {
    /// Forward-slash path relative to the working copy
    pub source_path: String,

    /// Where the bytes live: `<syncpointId>/<relativePath>` for directory
    /// stores, `relativePath@syncpointId\zipFilename` for compressed ones
    pub relative_remote_path: String,

    /// Added/changed or deleted
    pub entry_type: EntryType,

    /// Syncpoint that recorded this entry; derived from the containing file
    #[serde(skip)]
    pub owning_syncpoint_id: String,
}

impl SyncPointEntry {
    /// Whether this entry is a tombstone
    pub fn is_tombstone(&self) -> bool {
        self.entry_type == EntryType::Deleted
    }
}

/// An immutable, named snapshot of the changes since the previous syncpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPoint {
    /// Unique id within the store
    #[serde(rename = "sync_point_id")]
    pub id: String,

    /// Free text description
    #[serde(default)]
    pub description: String,

    /// Creation time (UTC)
    #[serde(rename = "last_sync_time")]
    pub created_at: DateTime<Utc>,

    /// Usable as a three-way merge base
    #[serde(rename = "reference_point", default)]
    pub is_reference_point: bool,

    /// Entries in the order they were recorded
    #[serde(default)]
    pub entries: Vec<SyncPointEntry>,
}

impl SyncPoint {
    /// Empty syncpoint created now
    pub fn new(id: impl Into<String>, description: impl Into<String>, is_reference_point: bool) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            created_at: Utc::now(),
            is_reference_point,
            entries: Vec::new(),
        }
    }

    /// Default id for a syncpoint created at `at`
    pub fn generate_id(at: DateTime<Utc>) -> String {
        at.format(ID_FORMAT).to_string()
    }

    /// Record an entry owned by this syncpoint
    pub fn add_entry(
        &mut self,
        source_path: impl Into<String>,
        relative_remote_path: impl Into<String>,
        entry_type: EntryType,
    ) {
        self.entries.push(SyncPointEntry {
            source_path: source_path.into(),
            relative_remote_path: relative_remote_path.into(),
            entry_type,
            owning_syncpoint_id: self.id.clone(),
        });
    }

    /// Entry recorded for a path in this syncpoint, if any
    pub fn entry_for(&self, source_path: &str) -> Option<&SyncPointEntry> {
        self.entries.iter().rev().find(|e| e.source_path == source_path)
    }

    /// Stamp entries loaded from disk with their owning syncpoint
    pub(crate) fn adopt_entries(&mut self) {
        for entry in &mut self.entries {
            entry.owning_syncpoint_id = self.id.clone();
        }
    }
}

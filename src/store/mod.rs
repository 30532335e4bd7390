// Syncpoint Store module
// Persisted snapshots of a remote store and the compaction that reads them

pub mod address;
pub mod content;
pub mod manager;
pub mod model;

pub use address::ArchiveAddress;
pub use content::StoredLocation;
pub use manager::{compact_entries, SyncPointStore};
pub use model::{
    EntryType, StoreMode, SyncPoint, SyncPointEntry, SyncPointRoot, ID_FORMAT, LATEST, ROOT_FILE,
};

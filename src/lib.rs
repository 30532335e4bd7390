// Syncpoint Library
// Versioned file synchronization: syncpoint snapshots, restore and line-based merge

// Core infrastructure - settings, remote binding, event sinks
pub mod core;

// Error taxonomy shared by every operation
pub mod error;

// Operations - change detection, synchronizers, restore, diff and merge
pub mod operations;

// Repository - workflows over a working copy and its remote
pub mod repository;

// Store - syncpoint metadata and compaction
pub mod store;

// Utilities - helper functions and tools
pub mod utilities;

// Re-export commonly used items for convenience
pub use crate::core::{MemoryReporter, RemoteConfig, Reporter, SyncSettings, TracingReporter};
pub use error::{ErrorKind, Result, SyncError};
pub use operations::{
    ChangeDetector, DirectorySynchronizer, MergePolicy, MergeResult, Merger, Restorer,
    Synchronizer, ZipSynchronizer,
};
pub use repository::{manual_sync, merge, LocalRepository};
pub use store::{StoreMode, SyncPoint, SyncPointEntry, SyncPointStore};

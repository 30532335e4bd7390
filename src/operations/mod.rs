// Operations module
// Change detection, synchronizers, restore, diff and merge

pub mod archive;
pub mod detector;
pub mod diff;
pub mod merge;
pub mod restore;
pub mod sync;
pub mod tree_merge;

pub use archive::{ArchiveLock, ZipSynchronizer};
pub use detector::{ChangeDetector, CopyDecision, FileStamp, TimePrecision};
pub use diff::{diff_lines, join_lines, split_lines, DiffBlock};
pub use merge::{
    ConflictKind, MergeConflict, MergePolicy, MergeResult, MergeStatistics, Merger,
};
pub use restore::{RestoreSummary, Restorer};
pub use sync::{collect_files, DirectorySynchronizer, Recording, SyncSummary, Synchronizer};
pub use tree_merge::{FileMergeOutcome, MergeBase, TreeMergeReport, TreeMerger};

// Repository module
// Orchestration of store, synchronizers, restorer and merger for working copies

pub mod local;
pub mod workflow;

pub use local::{LocalRepository, INIT_SYNCPOINT_ID};
pub use workflow::{find_common_reference, manual_sync, merge, POSTMERGE_PREFIX, PREMERGE_PREFIX};

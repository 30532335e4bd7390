// Core infrastructure module
// Settings, working-copy bindings and event sinks that other modules depend on

pub mod events;
pub mod remote_config;
pub mod settings;

pub use events::{MemoryReporter, Reporter, SyncEvent, TracingReporter};
pub use remote_config::RemoteConfig;
pub use settings::{SyncSettings, METADATA_DIR};

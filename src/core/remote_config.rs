// Remote Configuration
// Binds a working copy to its remote store and remembers the checked-out syncpoint

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::settings::METADATA_DIR;
use crate::error::{Result, SyncError};

/// Remote config file name inside the metadata folder
pub const REMOTE_CONFIG_FILE: &str = "remote.yaml";

/// Per working copy binding to a remote store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Root of the remote store
    pub remote_path: PathBuf,

    /// Syncpoint the working copy was last pushed to or restored from
    #[serde(default)]
    pub current_syncpoint_id: Option<String>,
}

impl RemoteConfig {
    /// Create a binding with no checked-out syncpoint
    pub fn new(remote_path: impl Into<PathBuf>) -> Self {
        Self {
            remote_path: remote_path.into(),
            current_syncpoint_id: None,
        }
    }

    /// Location of the config file for a working copy
    pub fn config_path(working_copy: &Path) -> PathBuf {
        working_copy.join(METADATA_DIR).join(REMOTE_CONFIG_FILE)
    }

    /// Whether a working copy has been bound to a remote
    pub fn exists(working_copy: &Path) -> bool {
        Self::config_path(working_copy).is_file()
    }

    /// Load the config of a working copy
    pub fn load(working_copy: &Path) -> Result<Self> {
        let path = Self::config_path(working_copy);
        let content = fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))?;

        serde_yaml::from_str(&content).map_err(|e| SyncError::Settings { path, source: e })
    }

    /// Save the config of a working copy
    pub fn save(&self, working_copy: &Path) -> Result<()> {
        let path = Self::config_path(working_copy);
        let content = serde_yaml::to_string(self).map_err(|e| SyncError::Settings {
            path: path.clone(),
            source: e,
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }
        fs::write(&path, content).map_err(|e| SyncError::io(&path, e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = RemoteConfig::new("/mnt/remote");
        config.current_syncpoint_id = Some("20240101120000UTC".to_string());
        config.save(dir.path()).unwrap();

        assert!(RemoteConfig::exists(dir.path()));
        assert!(dir.path().join(".syncpoint").join("remote.yaml").is_file());
        assert_eq!(RemoteConfig::load(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_missing_config_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = RemoteConfig::load(dir.path()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}

// Sync Settings
// Working-copy level settings that tune change detection, retries and merging

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};
use crate::operations::ChangeDetector;
use crate::utilities::{PatternMatcher, RetryPolicy};

/// Hidden folder beside every working copy that holds its bookkeeping
pub const METADATA_DIR: &str = ".syncpoint";

/// Settings file name inside the metadata folder
pub const SETTINGS_FILE: &str = "settings.yaml";

/// Settings for one working copy
/// Loaded from `.syncpoint/settings.yaml`; every field has a default
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    /// Compare SHA-256 digests when timestamp and size agree
    pub strict_mode: bool,

    /// Copy every file regardless of timestamps
    pub always_overwrite: bool,

    /// Bookkeeping folders skipped by every tree walk
    pub excluded_folders: Vec<String>,

    /// Additional glob-like patterns to skip
    pub exclude_patterns: Vec<String>,

    /// Retry window for locked files
    pub retry: RetryPolicy,

    /// Extensions (without dot) merged line by line; everything else is binary
    pub text_extensions: Vec<String>,

    /// Include the base chunk between conflict markers in three-way merges
    pub conflict_base_context: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            strict_mode: false,
            always_overwrite: false,
            excluded_folders: vec![METADATA_DIR.to_string()],
            exclude_patterns: Vec::new(),
            retry: RetryPolicy::default(),
            text_extensions: default_text_extensions(),
            conflict_base_context: false,
        }
    }
}

fn default_text_extensions() -> Vec<String> {
    [
        "txt", "md", "markdown", "rst", "csv", "log", "ini", "cfg", "conf", "config",
        "json", "xml", "yaml", "yml", "toml", "html", "htm", "css", "js", "ts", "jsx",
        "tsx", "rs", "cs", "c", "h", "cpp", "hpp", "java", "py", "rb", "go", "sh",
        "bat", "ps1", "sql", "csproj", "sln", "props", "targets",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl SyncSettings {
    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;

        let settings: SyncSettings = serde_yaml::from_str(&content).map_err(|e| {
            SyncError::Settings {
                path: path.to_path_buf(),
                source: e,
            }
        })?;

        Ok(settings.with_env_overrides().normalized())
    }

    /// Load settings for a working copy, falling back to defaults when absent
    pub fn load_for_working_copy(working_copy: &Path) -> Result<Self> {
        let path = Self::settings_path(working_copy);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default().with_env_overrides())
        }
    }

    /// Location of the settings file for a working copy
    pub fn settings_path(working_copy: &Path) -> PathBuf {
        working_copy.join(METADATA_DIR).join(SETTINGS_FILE)
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).map_err(|e| SyncError::Settings {
            path: path.to_path_buf(),
            source: e,
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }
        fs::write(path, content).map_err(|e| SyncError::io(path, e))?;

        Ok(())
    }

    /// Apply environment variable overrides
    fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var("SYNCPOINT_STRICT_MODE") {
            self.strict_mode = matches!(value.trim(), "1" | "true" | "yes");
        }
        if let Ok(value) = std::env::var("SYNCPOINT_RETRY_ATTEMPTS") {
            if let Ok(attempts) = value.trim().parse() {
                self.retry.attempts = attempts;
            }
        }
        self
    }

    /// The metadata folder is excluded even when a settings file omits it
    fn normalized(mut self) -> Self {
        if !self
            .excluded_folders
            .iter()
            .any(|f| f.eq_ignore_ascii_case(METADATA_DIR))
        {
            self.excluded_folders.push(METADATA_DIR.to_string());
        }
        self
    }

    /// Change detector configured from these settings
    pub fn detector(&self) -> ChangeDetector {
        ChangeDetector {
            always_overwrite: self.always_overwrite,
            strict: self.strict_mode,
        }
    }

    /// Pattern matcher for tree walks
    pub fn matcher(&self) -> PatternMatcher {
        PatternMatcher::new(self.excluded_folders.clone(), self.exclude_patterns.clone())
    }

    /// Whether a file is merged line by line
    pub fn is_text_file(&self, path: &Path) -> bool {
        crate::utilities::paths::extension_lower(path)
            .map(|ext| self.text_extensions.iter().any(|t| t.eq_ignore_ascii_case(&ext)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_exclude_metadata_folder() {
        let settings = SyncSettings::default();
        assert!(settings.matcher().should_exclude(".syncpoint/remote.yaml"));
        assert_eq!(settings.retry.attempts, 10);
        assert_eq!(settings.retry.delay_ms, 1000);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(&path, "always_overwrite: true\nexcluded_folders: [logs]\n").unwrap();

        let settings = SyncSettings::load(&path).unwrap();
        assert!(settings.always_overwrite);
        assert!(settings.excluded_folders.iter().any(|f| f == "logs"));
        assert!(settings.excluded_folders.iter().any(|f| f == METADATA_DIR));
        assert!(!settings.text_extensions.is_empty());
    }

    #[test]
    fn test_text_detection() {
        let settings = SyncSettings::default();
        assert!(settings.is_text_file(Path::new("notes/README.MD")));
        assert!(settings.is_text_file(Path::new("src/lib.rs")));
        assert!(!settings.is_text_file(Path::new("image.png")));
        assert!(!settings.is_text_file(Path::new("Makefile")));
    }

    #[test]
    fn test_invalid_yaml_is_configuration_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(&path, "retry: [not, a, map]\n").unwrap();

        let err = SyncSettings::load(&path).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}

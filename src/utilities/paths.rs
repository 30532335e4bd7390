// Path Utilities
// Helper functions for path manipulation and relative-path keys

use std::path::{Component, Path, PathBuf};

/// Normalize a path by resolving . and .. components
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    
    for component in path.components() {
        match component {
            Component::ParentDir => {
                components.pop();
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }
    
    components.iter().collect()
}

/// Check if a path is inside a directory
pub fn is_inside(path: &Path, directory: &Path) -> bool {
    let path = normalize_path(path);
    let directory = normalize_path(directory);
    
    path.starts_with(&directory)
}

/// Get the file extension as a lowercase string
pub fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Relative key of `path` under `root`, always using forward slashes.
///
/// Keys are what syncpoint entries and archive entry names store, so the same
/// tree produces the same keys on every platform.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Turn a forward-slash key back into a path under `root`
pub fn key_to_path(root: &Path, key: &str) -> PathBuf {
    key.split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_normalize_path() {
        let path = Path::new("a/b/../c/./d");
        assert_eq!(normalize_path(path), PathBuf::from("a/c/d"));
    }
    
    #[test]
    fn test_relative_key_uses_forward_slashes() {
        let root = Path::new("/work");
        let file = root.join("docs").join("guide").join("intro.md");
        assert_eq!(relative_key(root, &file).as_deref(), Some("docs/guide/intro.md"));
        assert_eq!(relative_key(root, root), None);
        assert_eq!(relative_key(root, Path::new("/elsewhere/file")), None);
    }
    
    #[test]
    fn test_key_to_path_accepts_both_separators() {
        let root = Path::new("/work");
        assert_eq!(key_to_path(root, "a/b\\c.txt"), root.join("a").join("b").join("c.txt"));
    }
    
    #[test]
    fn test_is_inside() {
        assert!(is_inside(Path::new("/a/b/c"), Path::new("/a/b")));
        assert!(!is_inside(Path::new("/a/bc"), Path::new("/a/b")));
    }
}

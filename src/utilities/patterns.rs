// Pattern Matching Utilities
// Glob-like pattern matching for folder and file exclusions

/// Check if a single path component matches a pattern.
///
/// Supports a leading `*` (suffix match), a trailing `*` (prefix match), a
/// single inner `*`, or an exact, case-insensitive name.
pub fn matches_pattern(component: &str, pattern: &str) -> bool {
    let name = component.to_lowercase();
    let pattern = pattern.to_lowercase();
    
    if let Some(suffix) = pattern.strip_prefix('*') {
        name.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        name.starts_with(prefix)
    } else if let Some((head, tail)) = pattern.split_once('*') {
        name.len() >= head.len() + tail.len() && name.starts_with(head) && name.ends_with(tail)
    } else {
        name == pattern
    }
}

/// Pattern matcher for tree walks.
///
/// Folder names exclude a whole subtree; patterns exclude any path with a
/// matching component.
#[derive(Debug, Clone, Default)]
pub struct PatternMatcher {
    folders: Vec<String>,
    patterns: Vec<String>,
}

impl PatternMatcher {
    /// Create a matcher from excluded folder names and extra patterns
    pub fn new(folders: Vec<String>, patterns: Vec<String>) -> Self {
        Self { folders, patterns }
    }
    
    /// Check if a forward-slash relative key should be excluded
    pub fn should_exclude(&self, key: &str) -> bool {
        let mut components = key.split('/').filter(|c| !c.is_empty()).peekable();
        while let Some(component) = components.next() {
            let is_folder = components.peek().is_some();
            if is_folder && self.folders.iter().any(|f| f.eq_ignore_ascii_case(component)) {
                return true;
            }
            if self.patterns.iter().any(|p| matches_pattern(component, p)) {
                return true;
            }
        }
        false
    }
    
    /// Check if a directory (by relative key) is a bookkeeping subtree
    pub fn is_excluded_folder(&self, key: &str) -> bool {
        key.split('/')
            .filter(|c| !c.is_empty())
            .any(|c| self.folders.iter().any(|f| f.eq_ignore_ascii_case(c)))
            || key
                .rsplit('/')
                .next()
                .map(|c| self.patterns.iter().any(|p| matches_pattern(c, p)))
                .unwrap_or(false)
    }
}

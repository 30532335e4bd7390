// Utilities module
// Helper functions and tools

pub mod hashing;
pub mod paths;
pub mod patterns;
pub mod retry;

pub use hashing::{sha256_file, sha256_reader, Digest256};
pub use paths::{is_inside, key_to_path, normalize_path, relative_key};
pub use patterns::{matches_pattern, PatternMatcher};
pub use retry::{is_retryable, RetryPolicy};

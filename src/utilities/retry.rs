// Retry Policy
// Bounded retry for operations that can fail on a locked file

use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// How often and how long to retry an operation against a locked file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Pause between attempts in milliseconds
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay_ms: 1000,
        }
    }
}

/// Windows sharing and lock violations
const ERROR_SHARING_VIOLATION: i32 = 32;
const ERROR_LOCK_VIOLATION: i32 = 33;

/// Whether an error looks like another process holding the file
pub fn is_retryable(error: &io::Error) -> bool {
    match error.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock => true,
        _ => cfg!(windows)
            && matches!(
                error.raw_os_error(),
                Some(ERROR_SHARING_VIOLATION) | Some(ERROR_LOCK_VIOLATION)
            ),
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// Only lock-like failures are retried; anything else is returned at once.
    pub fn run<T, F>(&self, path: &Path, mut op: F) -> Result<T>
    where
        F: FnMut() -> io::Result<T>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if !is_retryable(&e) => {
                    return Err(SyncError::io(path, e));
                }
                Err(e) if attempt >= attempts => {
                    return Err(SyncError::Locked {
                        path: path.to_path_buf(),
                        attempts,
                        source: e,
                    });
                }
                Err(e) => {
                    tracing::debug!(
                        "Attempt {}/{} on {} failed: {}",
                        attempt,
                        attempts,
                        path.display(),
                        e
                    );
                    thread::sleep(Duration::from_millis(self.delay_ms));
                    attempt += 1;
                }
            }
        }
    }
}

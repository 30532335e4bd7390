// Event Reporting
// Progress and message sinks handed to every long-running operation

use std::sync::Mutex;

/// Events emitted by synchronization, restore and merge operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// One file of `total` has been handled
    Progress {
        /// Files handled so far
        current: usize,
        /// Files in this operation
        total: usize,
        /// Relative path or step description
        label: String,
    },

    /// Human readable message, with error detail when something failed
    Message {
        /// Message text
        message: String,
        /// Error description, if this message reports a failure
        error_detail: Option<String>,
    },
}

/// Sink for progress and messages.
///
/// Operations call the sink synchronously after each file. An implementation
/// that wants to stop early must do so between operations; there is no
/// cancellation from inside a call.
pub trait Reporter {
    /// Report progress after a file has been handled
    fn progress(&self, current: usize, total: usize, label: &str);

    /// Report a message, with optional error detail
    fn message(&self, message: &str, error_detail: Option<&str>);

    /// Report a failure
    fn error(&self, message: &str, error: &dyn std::error::Error) {
        self.message(message, Some(&error.to_string()));
    }
}

/// Forwards everything to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn progress(&self, current: usize, total: usize, label: &str) {
        tracing::debug!("[{}/{}] {}", current, total, label);
    }

    fn message(&self, message: &str, error_detail: Option<&str>) {
        match error_detail {
            Some(detail) => tracing::error!("{}: {}", message, detail),
            None => tracing::info!("{}", message),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<SyncEvent>>,
}

impl MemoryReporter {
    /// Create an empty reporter
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Message texts so far
    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::Message { message, .. } => Some(message),
                SyncEvent::Progress { .. } => None,
            })
            .collect()
    }

    /// Messages that carried error detail
    pub fn errors(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::Message {
                    message,
                    error_detail: Some(detail),
                } => Some((message, detail)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: SyncEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl Reporter for MemoryReporter {
    fn progress(&self, current: usize, total: usize, label: &str) {
        self.push(SyncEvent::Progress {
            current,
            total,
            label: label.to_string(),
        });
    }

    fn message(&self, message: &str, error_detail: Option<&str>) {
        self.push(SyncEvent::Message {
            message: message.to_string(),
            error_detail: error_detail.map(str::to_string),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_reporter_captures_in_order() {
        let reporter = MemoryReporter::new();
        reporter.progress(1, 2, "a.txt");
        reporter.message("done", None);
        reporter.message("failed", Some("locked"));

        let events = reporter.events();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            SyncEvent::Progress {
                current: 1,
                total: 2,
                label: "a.txt".to_string()
            }
        );
        assert_eq!(reporter.messages(), vec!["done", "failed"]);
        assert_eq!(reporter.errors(), vec![("failed".to_string(), "locked".to_string())]);
    }
}

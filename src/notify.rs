//! User-facing notices.
//!
//! Controllers report outcomes ("Timer started", "Failed to fetch tasks")
//! through a [`Notifier`]. Notices are kept in a bounded history, newest
//! first, and each one is also emitted as a tracing event.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Maximum history entries to keep
const MAX_HISTORY_ENTRIES: usize = 100;

/// Notice severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Warning,
    Error,
}

impl NotificationLevel {
    /// Prefix used in human-readable output
    pub fn icon(&self) -> &'static str {
        match self {
            NotificationLevel::Success => "✓",
            NotificationLevel::Warning => "⚠",
            NotificationLevel::Error => "✗",
        }
    }
}

/// Entry in the notice history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub level: NotificationLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// `✗ Failed to fetch tasks`
    pub fn line(&self) -> String {
        format!("{} {}", self.level.icon(), self.message)
    }
}

/// Shared, cloneable notice history.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    history: Arc<Mutex<VecDeque<HistoryEntry>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self, level: NotificationLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            NotificationLevel::Error => tracing::error!(notice = %message),
            NotificationLevel::Warning => tracing::warn!(notice = %message),
            NotificationLevel::Success => tracing::info!(notice = %message),
        }
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_front(HistoryEntry {
            level,
            message,
            timestamp: Utc::now(),
        });
        history.truncate(MAX_HISTORY_ENTRIES);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.notify(NotificationLevel::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.notify(NotificationLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notify(NotificationLevel::Error, message);
    }

    /// History snapshot, newest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Most recent notice, if any.
    pub fn latest(&self) -> Option<HistoryEntry> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .front()
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_bounded() {
        let notifier = Notifier::new();
        for i in 0..(MAX_HISTORY_ENTRIES + 10) {
            notifier.success(format!("Message {}", i));
        }
        let history = notifier.history();
        assert_eq!(history.len(), MAX_HISTORY_ENTRIES);
        assert_eq!(history[0].message, format!("Message {}", MAX_HISTORY_ENTRIES + 9));
    }

    #[test]
    fn test_notifier_shares_state() {
        let notifier = Notifier::new();
        let clone = notifier.clone();
        clone.error("Failed to fetch tasks");
        notifier.success("Timer started");

        let latest = notifier.latest().unwrap();
        assert_eq!(latest.level, NotificationLevel::Success);
        assert_eq!(latest.line(), "✓ Timer started");
        assert_eq!(notifier.history().len(), 2);
        assert_eq!(notifier.history()[1].line(), "✗ Failed to fetch tasks");
    }
}

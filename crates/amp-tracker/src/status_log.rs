//! Bounded, retained operational log.
//!
//! Newest entries sit at the front of a ring buffer capped at [`LOG_CAP`]
//! entries. Non-critical entries are pruned once they age past
//! [`LOG_RETENTION_HOURS`]; critical entries (missing credentials, auth
//! failures) are retained indefinitely.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Maximum number of retained entries; the oldest fall off first.
pub const LOG_CAP: usize = 1000;

/// Hours a non-critical entry survives.
pub const LOG_RETENTION_HOURS: i64 = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Updated,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub region: Option<String>,
    pub submission_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub kind: LogKind,
    pub message: String,
    pub critical: bool,
}

impl LogEntry {
    #[must_use]
    pub fn new(at: DateTime<Utc>, kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            at,
            region: None,
            submission_id: None,
            user_id: None,
            kind,
            message: message.into(),
            critical: false,
        }
    }

    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn submission(mut self, submission_id: Uuid, user_id: Uuid) -> Self {
        self.submission_id = Some(submission_id);
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// The ring buffer itself. Owned by the scheduler state; all mutation goes
/// through [`StatusLog::push`] so pruning can never be skipped.
#[derive(Debug, Default)]
pub struct StatusLog {
    entries: VecDeque<LogEntry>,
}

impl StatusLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend an entry, prune, and enforce the cap.
    pub fn push(&mut self, entry: LogEntry, now: DateTime<Utc>) {
        self.entries.push_front(entry);
        self.prune(now);
        self.entries.truncate(LOG_CAP);
    }

    /// Drop non-critical entries older than the retention window.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(LOG_RETENTION_HOURS);
        self.entries.retain(|e| e.critical || e.at >= cutoff);
    }

    /// Prune, then return the retained entries newest-first.
    #[must_use]
    pub fn snapshot(&mut self, now: DateTime<Utc>) -> Vec<LogEntry> {
        self.prune(now);
        self.entries.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(at: DateTime<Utc>, message: &str) -> LogEntry {
        LogEntry::new(at, LogKind::Updated, message)
    }

    #[test]
    fn newest_entries_come_first() {
        let now = Utc::now();
        let mut log = StatusLog::new();
        log.push(entry(now, "first"), now);
        log.push(entry(now, "second"), now);
        let entries = log.snapshot(now);
        assert_eq!(entries[0].message, "second");
        assert_eq!(entries[1].message, "first");
    }

    #[test]
    fn buffer_never_exceeds_cap() {
        let now = Utc::now();
        let mut log = StatusLog::new();
        for i in 0..(LOG_CAP + 50) {
            log.push(entry(now, &format!("e{i}")), now);
        }
        assert_eq!(log.len(), LOG_CAP);
        // Oldest were dropped: the front is the most recent push.
        let entries = log.snapshot(now);
        assert_eq!(entries[0].message, format!("e{}", LOG_CAP + 49));
    }

    #[test]
    fn stale_entries_are_pruned_on_read() {
        let start = Utc::now();
        let mut log = StatusLog::new();
        log.push(entry(start, "old"), start);

        // 49 hours later the entry has aged out.
        let later = start + Duration::hours(49);
        assert!(log.snapshot(later).is_empty());
    }

    #[test]
    fn critical_entries_survive_retention() {
        let start = Utc::now();
        let mut log = StatusLog::new();
        log.push(
            LogEntry::new(start, LogKind::Error, "token rejected").critical(),
            start,
        );
        log.push(entry(start, "routine"), start);

        let later = start + Duration::hours(49);
        let entries = log.snapshot(later);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].critical);
        assert_eq!(entries[0].message, "token rejected");
    }

    #[test]
    fn entries_within_retention_are_kept() {
        let start = Utc::now();
        let mut log = StatusLog::new();
        log.push(entry(start, "recent"), start);
        let later = start + Duration::hours(47);
        assert_eq!(log.snapshot(later).len(), 1);
    }
}

//! Per-session check history.
//!
//! A bounded record of completed checks, persisted to
//! `data/check-history.json` so the `status` command can show recent activity
//! across restarts.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use monitor_core::models::CheckOutcome;
use serde::{Deserialize, Serialize};

use crate::store;

/// Cap on retained records; the oldest are discarded beyond this.
pub const MAX_HISTORY_RECORDS: usize = 500;

// ── CheckRecord ───────────────────────────────────────────────────────────────

/// Summary of one completed check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub outcome: CheckOutcome,
    pub appointment_count: usize,
    pub available_count: usize,
    pub filled_count: usize,
    pub duration_ms: u64,
}

// ── CheckHistory ──────────────────────────────────────────────────────────────

/// Bounded, persisted list of check records.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CheckHistory {
    records: Vec<CheckRecord>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl CheckHistory {
    /// Load history from `path`, or start empty when the file is absent or
    /// corrupt.
    pub fn open(path: PathBuf) -> Self {
        let mut history: Self = store::load(&path);
        history.path = Some(path);
        history
    }

    /// Append a record, trimming the oldest beyond [`MAX_HISTORY_RECORDS`],
    /// and persist.
    pub fn record(&mut self, record: CheckRecord) {
        self.records.push(record);
        if self.records.len() > MAX_HISTORY_RECORDS {
            let excess = self.records.len() - MAX_HISTORY_RECORDS;
            self.records.drain(..excess);
        }
        self.persist();
    }

    /// Most recent records, newest last.
    pub fn recent(&self, count: usize) -> &[CheckRecord] {
        let start = self.records.len().saturating_sub(count);
        &self.records[start..]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = store::save(path, self) {
            tracing::warn!(error = %e, "failed to persist check history");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(i: u64) -> CheckRecord {
        CheckRecord {
            timestamp: Utc::now(),
            session_id: "sess-1".to_string(),
            outcome: CheckOutcome::NoSlots,
            appointment_count: 0,
            available_count: 0,
            filled_count: 0,
            duration_ms: i,
        }
    }

    #[test]
    fn test_record_and_recent() {
        let dir = TempDir::new().unwrap();
        let mut history = CheckHistory::open(dir.path().join("check-history.json"));

        for i in 0..5 {
            history.record(record(i));
        }

        assert_eq!(history.len(), 5);
        let recent = history.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].duration_ms, 3);
        assert_eq!(recent[1].duration_ms, 4);
    }

    #[test]
    fn test_recent_more_than_available() {
        let dir = TempDir::new().unwrap();
        let mut history = CheckHistory::open(dir.path().join("check-history.json"));
        history.record(record(1));
        assert_eq!(history.recent(10).len(), 1);
    }

    #[test]
    fn test_bounded_at_max_records() {
        let dir = TempDir::new().unwrap();
        let mut history = CheckHistory::open(dir.path().join("check-history.json"));

        for i in 0..(MAX_HISTORY_RECORDS as u64 + 10) {
            history.record(record(i));
        }

        assert_eq!(history.len(), MAX_HISTORY_RECORDS);
        // Oldest entries were discarded.
        assert_eq!(history.recent(1)[0].duration_ms, MAX_HISTORY_RECORDS as u64 + 9);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("check-history.json");

        {
            let mut history = CheckHistory::open(path.clone());
            history.record(record(7));
        }

        let reopened = CheckHistory::open(path);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.recent(1)[0].duration_ms, 7);
    }
}

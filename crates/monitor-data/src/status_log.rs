//! Append-only structured event log with rotation.
//!
//! Events are line-delimited JSON objects `{timestamp, level, event, details,
//! session_id}` written to `monitor.log`. Writes below the configured level
//! are dropped. When the file exceeds `max_size` it is renamed with a
//! timestamp suffix; beyond `max_files` rotated files the oldest are deleted.
//! Rotation and cleanup failures are logged but never propagate.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Rotate when the active file exceeds this many bytes (5 MB).
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 5 * 1024 * 1024;

/// Keep at most this many rotated files.
pub const DEFAULT_MAX_FILES: usize = 5;

// ── LogLevel ──────────────────────────────────────────────────────────────────

/// Severity of a status-log event, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// Parse a level name; unrecognised names default to `Info`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "error" => Self::Error,
            "warn" | "warning" => Self::Warn,
            "debug" => Self::Debug,
            _ => Self::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

// ── LogEvent ──────────────────────────────────────────────────────────────────

/// One structured line in the status log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Event name, e.g. `"check-completed"`.
    pub event: String,
    /// Arbitrary structured payload.
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

// ── Session statistics ────────────────────────────────────────────────────────

/// Per-session counts of events written, by level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogStatistics {
    pub errors: u64,
    pub warnings: u64,
    pub infos: u64,
    pub debugs: u64,
}

impl LogStatistics {
    pub fn total(&self) -> u64 {
        self.errors + self.warnings + self.infos + self.debugs
    }
}

// ── StatusLog ─────────────────────────────────────────────────────────────────

/// Append-only JSONL event log with size-based rotation.
pub struct StatusLog {
    path: PathBuf,
    min_level: LogLevel,
    max_size: u64,
    max_files: usize,
    session_id: Option<String>,
    stats: LogStatistics,
}

impl StatusLog {
    /// Open a status log writing to `path`, gated at `min_level`.
    pub fn new(path: PathBuf, min_level: LogLevel) -> Self {
        Self {
            path,
            min_level,
            max_size: DEFAULT_MAX_SIZE_BYTES,
            max_files: DEFAULT_MAX_FILES,
            session_id: None,
            stats: LogStatistics::default(),
        }
    }

    /// Override the rotation thresholds.
    pub fn with_rotation(mut self, max_size: u64, max_files: usize) -> Self {
        self.max_size = max_size;
        self.max_files = max_files;
        self
    }

    /// Stamp subsequent events with this session id.
    pub fn set_session(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
        self.stats = LogStatistics::default();
    }

    /// Counts of events written since the session started.
    pub fn statistics(&self) -> LogStatistics {
        self.stats
    }

    // ── Writing ───────────────────────────────────────────────────────────

    /// Append one event, if it passes the level gate.
    ///
    /// Write failures are reported once via `tracing::warn!` but never
    /// propagate; the monitor keeps running without its status log.
    pub fn write(&mut self, level: LogLevel, event: &str, details: serde_json::Value) {
        if level > self.min_level {
            return;
        }

        match level {
            LogLevel::Error => self.stats.errors += 1,
            LogLevel::Warn => self.stats.warnings += 1,
            LogLevel::Info => self.stats.infos += 1,
            LogLevel::Debug => self.stats.debugs += 1,
        }

        let entry = LogEvent {
            timestamp: Utc::now(),
            level,
            event: event.to_string(),
            details,
            session_id: self.session_id.clone(),
        };

        self.rotate_if_needed();

        if let Err(e) = self.append_line(&entry) {
            tracing::warn!(error = %e, path = %self.path.display(), "status log write failed");
        }
    }

    pub fn error(&mut self, event: &str, details: serde_json::Value) {
        self.write(LogLevel::Error, event, details);
    }

    pub fn warn(&mut self, event: &str, details: serde_json::Value) {
        self.write(LogLevel::Warn, event, details);
    }

    pub fn info(&mut self, event: &str, details: serde_json::Value) {
        self.write(LogLevel::Info, event, details);
    }

    pub fn debug(&mut self, event: &str, details: serde_json::Value) {
        self.write(LogLevel::Debug, event, details);
    }

    /// Flush is implicit (each line is a separate append); kept as an explicit
    /// hook for the shutdown path.
    pub fn flush(&mut self) {}

    // ── Private helpers ───────────────────────────────────────────────────

    fn append_line(&self, entry: &LogEvent) -> std::io::Result<()> {
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
        writeln!(file, "{line}")
    }

    /// Rotate the active file when it has grown past `max_size`, then prune
    /// old rotated files down to `max_files`.
    fn rotate_if_needed(&self) {
        let size = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return,
        };
        if size < self.max_size {
            return;
        }

        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let rotated = self.path.with_file_name(format!(
            "{}.{stamp}",
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "monitor.log".to_string())
        ));

        if let Err(e) = std::fs::rename(&self.path, &rotated) {
            tracing::warn!(error = %e, "status log rotation failed");
            return;
        }
        tracing::debug!(rotated = %rotated.display(), "status log rotated");

        self.prune_rotated();
    }

    /// Delete the oldest rotated files beyond `max_files`. Errors here are
    /// non-fatal.
    fn prune_rotated(&self) {
        let Some(dir) = self.path.parent() else {
            return;
        };
        let Some(base) = self.path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return;
        };
        let prefix = format!("{base}.");

        let mut rotated: Vec<PathBuf> = WalkDir::new(dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
            .map(|entry| entry.into_path())
            .collect();

        if rotated.len() <= self.max_files {
            return;
        }

        // Timestamp suffixes sort lexicographically, oldest first.
        rotated.sort();
        let excess = rotated.len() - self.max_files;
        for path in rotated.into_iter().take(excess) {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(error = %e, path = %path.display(), "rotated log cleanup failed");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

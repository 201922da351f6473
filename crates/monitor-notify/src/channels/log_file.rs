//! Notification log channel.
//!
//! Appends one JSON line per notification to `notifications.log`. This is
//! the critical-path channel: the append is retried twice with a 100 ms
//! pause, and a final failure makes the whole delivery count as failed.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use monitor_core::error::{MonitorError, Result};
use monitor_core::models::Appointment;

use super::NotificationChannel;
use crate::message;

/// Retries after the first failed append.
const MAX_RETRIES: u32 = 2;

/// Pause between attempts.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Structured notification log channel.
#[derive(Debug)]
pub struct LogFileChannel {
    path: PathBuf,
}

impl LogFileChannel {
    /// Create a channel appending to `path` (normally
    /// `logs/notifications.log`).
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

#[async_trait]
impl NotificationChannel for LogFileChannel {
    fn name(&self) -> &'static str {
        "log-file"
    }

    async fn deliver(&self, slots: &[Appointment]) -> Result<()> {
        let line = message::log_line(slots, Utc::now()).to_string();

        let mut last_err: Option<std::io::Error> = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tracing::debug!(attempt, "retrying notification log append");
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            match self.append(&line) {
                Ok(()) => {
                    tracing::debug!(slots = slots.len(), "notification logged");
                    return Ok(());
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(MonitorError::Notification {
            channel: "log-file".to_string(),
            detail: format!(
                "append to {} failed after {} attempts: {}",
                self.path.display(),
                MAX_RETRIES + 1,
                last_err.map(|e| e.to_string()).unwrap_or_default()
            ),
        })
    }

    async fn deliver_alert(&self, title: &str, body: &str) -> Result<()> {
        let line = serde_json::json!({
            "timestamp": Utc::now(),
            "type": "alert",
            "title": title,
            "body": body,
        })
        .to_string();
        self.append(&line).map_err(|e| MonitorError::Notification {
            channel: "log-file".to_string(),
            detail: format!("alert append failed: {e}"),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_core::models::AppointmentStatus;
    use tempfile::TempDir;

    fn slot(id: &str) -> Appointment {
        Appointment {
            id: id.to_string(),
            date: "2025-10-04".to_string(),
            time: "09:00-12:00".to_string(),
            city: "Isfahan".to_string(),
            exam_type: "CDIELTS".to_string(),
            location: "Safir Office".to_string(),
            status: AppointmentStatus::Available,
            price: None,
            registration_url: None,
        }
    }

    #[tokio::test]
    async fn test_deliver_appends_json_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notifications.log");
        let channel = LogFileChannel::new(path.clone());

        channel.deliver(&[slot("a")]).await.unwrap();
        channel.deliver(&[slot("b"), slot("c")]).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["appointment_count"], 1);
        assert_eq!(lines[1]["appointment_count"], 2);
        assert_eq!(lines[1]["appointments"][1]["id"], "c");
    }

    #[tokio::test]
    async fn test_deliver_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("notifications.log");
        let channel = LogFileChannel::new(path.clone());

        channel.deliver(&[slot("a")]).await.unwrap();
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deliver_fails_on_unwritable_target() {
        // A directory where the file should be makes every append fail.
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notifications.log");
        std::fs::create_dir(&path).unwrap();

        let channel = LogFileChannel::new(path);
        let err = channel.deliver(&[slot("a")]).await.unwrap_err();
        assert!(err.to_string().contains("log-file"));
    }
}

//! Central error routing.
//!
//! Components categorise failures at their boundary and hand them here with
//! an [`ErrorContext`] annotation. The handler appends a detailed trace to
//! `errors.log`, decides retry/fallback/skip/stop per category, and flags
//! persistent errors (the same signature repeating) so the scheduler can
//! raise a high-severity notification.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use monitor_core::error::{ErrorCategory, ErrorContext, MonitorError};

/// Repetitions of one signature before it is flagged persistent.
pub const DEFAULT_PERSISTENT_THRESHOLD: u32 = 5;

// ── ErrorAction ───────────────────────────────────────────────────────────────

/// What the caller should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Transient; try again at the next opportunity.
    Retry,
    /// Use the degraded path (console print, rewrite next tick).
    Fallback,
    /// Contained; log and move on.
    Skip,
    /// Unrecoverable; the controller must stop.
    Stop,
}

/// The handler's decision for one error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorDisposition {
    pub action: ErrorAction,
    /// `true` when this signature just crossed the persistence threshold.
    pub persistent: bool,
}

// ── ErrorHandler ──────────────────────────────────────────────────────────────

/// Category-based error router with persistent-error detection.
pub struct ErrorHandler {
    errors_log: PathBuf,
    counts: HashMap<String, u32>,
    threshold: u32,
}

impl ErrorHandler {
    pub fn new(errors_log: PathBuf) -> Self {
        Self {
            errors_log,
            counts: HashMap::new(),
            threshold: DEFAULT_PERSISTENT_THRESHOLD,
        }
    }

    /// Override the persistence threshold (tests use small values).
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    /// Route one error: record the trace, pick an action, count repetitions.
    pub fn handle(&mut self, error: &MonitorError, ctx: &ErrorContext) -> ErrorDisposition {
        let category = error.category();

        // Detailed traces go to errors.log only. A permission failure on the
        // error log itself is the one filesystem error treated as fatal.
        if let Err(e) = self.append_trace(error, ctx) {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                tracing::error!(
                    path = %self.errors_log.display(),
                    "cannot write the error log; refusing to run blind"
                );
                return ErrorDisposition {
                    action: ErrorAction::Stop,
                    persistent: false,
                };
            }
            tracing::warn!(error = %e, "error log append failed");
        }

        let action = match category {
            ErrorCategory::Network => ErrorAction::Retry,
            ErrorCategory::Parse => ErrorAction::Retry,
            ErrorCategory::Configuration => ErrorAction::Stop,
            ErrorCategory::Filesystem => ErrorAction::Fallback,
            ErrorCategory::Notification => ErrorAction::Fallback,
            ErrorCategory::Critical => ErrorAction::Stop,
        };

        let signature = error.signature();
        let count = self.counts.entry(signature.clone()).or_insert(0);
        *count += 1;
        let persistent = *count >= self.threshold;
        if persistent {
            tracing::warn!(
                signature = %signature,
                occurrences = *count,
                "persistent error detected"
            );
            // Reset so the next alert requires a fresh run of repetitions.
            *count = 0;
        }

        ErrorDisposition { action, persistent }
    }

    /// Forget repetition counts for signatures that have recovered.
    pub fn clear_signature(&mut self, error: &MonitorError) {
        self.counts.remove(&error.signature());
    }

    fn append_trace(&self, error: &MonitorError, ctx: &ErrorContext) -> std::io::Result<()> {
        use std::io::Write;

        if let Some(parent) = self.errors_log.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.errors_log)?;
        let line = serde_json::json!({
            "timestamp": Utc::now(),
            "category": error.category().as_str(),
            "operation": ctx.operation,
            "component": ctx.component,
            "session_id": ctx.session_id,
            "error": error.to_string(),
        });
        writeln!(file, "{line}")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn network_error() -> MonitorError {
        MonitorError::Network {
            operation: "fetch".to_string(),
            detail: "timeout".to_string(),
        }
    }

    fn handler(dir: &TempDir) -> ErrorHandler {
        ErrorHandler::new(dir.path().join("errors.log"))
    }

    #[test]
    fn test_actions_by_category() {
        let dir = TempDir::new().unwrap();
        let mut handler = handler(&dir);
        let ctx = ErrorContext::new("op", "test");

        assert_eq!(
            handler.handle(&network_error(), &ctx).action,
            ErrorAction::Retry
        );
        assert_eq!(
            handler
                .handle(
                    &MonitorError::Config {
                        summary: "bad".into()
                    },
                    &ctx
                )
                .action,
            ErrorAction::Stop
        );
        assert_eq!(
            handler
                .handle(
                    &MonitorError::Notification {
                        channel: "desktop".into(),
                        detail: "x".into()
                    },
                    &ctx
                )
                .action,
            ErrorAction::Fallback
        );
        assert_eq!(
            handler
                .handle(&MonitorError::Critical("impossible".into()), &ctx)
                .action,
            ErrorAction::Stop
        );
    }

    #[test]
    fn test_trace_written_to_errors_log() {
        let dir = TempDir::new().unwrap();
        let mut handler = handler(&dir);
        let ctx = ErrorContext::new("fetch", "scheduler").with_session("sess-1");

        handler.handle(&network_error(), &ctx);

        let content = std::fs::read_to_string(dir.path().join("errors.log")).unwrap();
        let line: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(line["category"], "network");
        assert_eq!(line["component"], "scheduler");
        assert_eq!(line["session_id"], "sess-1");
    }

    #[test]
    fn test_persistent_flag_after_threshold() {
        let dir = TempDir::new().unwrap();
        let mut handler = handler(&dir).with_threshold(3);
        let ctx = ErrorContext::new("fetch", "scheduler");

        assert!(!handler.handle(&network_error(), &ctx).persistent);
        assert!(!handler.handle(&network_error(), &ctx).persistent);
        // Third repetition crosses the threshold.
        assert!(handler.handle(&network_error(), &ctx).persistent);
        // Counter reset: the next one starts a fresh run.
        assert!(!handler.handle(&network_error(), &ctx).persistent);
    }

    #[test]
    fn test_different_signatures_counted_separately() {
        let dir = TempDir::new().unwrap();
        let mut handler = handler(&dir).with_threshold(2);
        let ctx = ErrorContext::new("fetch", "scheduler");

        let parse = MonitorError::Parse {
            url: "u".into(),
            detail: "d".into(),
        };
        assert!(!handler.handle(&network_error(), &ctx).persistent);
        assert!(!handler.handle(&parse, &ctx).persistent);
        assert!(handler.handle(&network_error(), &ctx).persistent);
    }

    #[test]
    fn test_clear_signature_resets_count() {
        let dir = TempDir::new().unwrap();
        let mut handler = handler(&dir).with_threshold(2);
        let ctx = ErrorContext::new("fetch", "scheduler");

        handler.handle(&network_error(), &ctx);
        handler.clear_signature(&network_error());
        // Count restarted: not persistent on what would have been the second.
        assert!(!handler.handle(&network_error(), &ctx).persistent);
    }
}

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// All errors produced by the monitor crates.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Transport-level failure reaching the upstream site (DNS, connect,
    /// timeout).
    #[error("Network error during {operation}: {detail}")]
    Network { operation: String, detail: String },

    /// The page loaded but the expected structure was absent.
    #[error("Parse error for {url}: {detail}")]
    Parse { url: String, detail: String },

    /// Upstream signalled throttling.
    #[error("Rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file could not be written to disk.
    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be parsed or produced.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// One or more configuration fields failed validation.
    #[error("Configuration invalid: {summary}")]
    Config { summary: String },

    /// A notification channel failed after exhausting its retries.
    #[error("Notification delivery failed on {channel}: {detail}")]
    Notification { channel: String, detail: String },

    /// An operation on the controller was not legal in its current state.
    #[error("Invalid lifecycle transition: {0}")]
    InvalidTransition(String),

    /// An assertion violation or impossible state.
    #[error("Critical error: {0}")]
    Critical(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the monitor crates.
pub type Result<T> = std::result::Result<T, MonitorError>;

// ── Categories ────────────────────────────────────────────────────────────────

/// Coarse error categories the error handler routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transient transport problems; retried at the next tick.
    Network,
    /// Structure missing from a fetched page.
    Parse,
    /// Invalid configuration; fatal for start/reconfigure.
    Configuration,
    /// Disk problems; degrade except for the error log itself.
    Filesystem,
    /// Channel delivery problems; contained, never stop the loop.
    Notification,
    /// Assertion violations; the controller transitions to ERROR.
    Critical,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parse => "parse",
            Self::Configuration => "configuration",
            Self::Filesystem => "filesystem",
            Self::Notification => "notification",
            Self::Critical => "critical",
        }
    }
}

impl MonitorError {
    /// Categorise this error for routing.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network { .. } | Self::RateLimited { .. } => ErrorCategory::Network,
            Self::Parse { .. } | Self::JsonParse(_) => ErrorCategory::Parse,
            Self::Config { .. } => ErrorCategory::Configuration,
            Self::FileRead { .. } | Self::FileWrite { .. } | Self::Io(_) => {
                ErrorCategory::Filesystem
            }
            Self::Notification { .. } => ErrorCategory::Notification,
            Self::InvalidTransition(_) | Self::Critical(_) | Self::Other(_) => {
                ErrorCategory::Critical
            }
        }
    }

    /// Stable signature for persistent-error counting.
    ///
    /// Two errors with the same signature are treated as repetitions of one
    /// underlying problem.
    pub fn signature(&self) -> String {
        match self {
            Self::Network { operation, .. } => format!("network:{operation}"),
            Self::Parse { url, .. } => format!("parse:{url}"),
            Self::RateLimited { .. } => "rate-limited".to_string(),
            Self::FileRead { path, .. } => format!("file-read:{}", path.display()),
            Self::FileWrite { path, .. } => format!("file-write:{}", path.display()),
            Self::JsonParse(_) => "json-parse".to_string(),
            Self::Config { .. } => "config".to_string(),
            Self::Notification { channel, .. } => format!("notification:{channel}"),
            Self::InvalidTransition(detail) => format!("transition:{detail}"),
            Self::Critical(detail) => format!("critical:{detail}"),
            Self::Io(e) => format!("io:{:?}", e.kind()),
            Self::Other(_) => "other".to_string(),
        }
    }
}

// ── Context annotation ────────────────────────────────────────────────────────

/// Boundary annotation attached when an error is handed to the error handler.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// The operation that failed, e.g. `"fetch"`.
    pub operation: String,
    /// The component the error surfaced in, e.g. `"scheduler"`.
    pub component: String,
    /// When the error was recorded.
    pub timestamp: DateTime<Utc>,
    /// Session the error belongs to, if one is running.
    pub session_id: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            component: component.into(),
            timestamp: Utc::now(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_network() {
        let err = MonitorError::Network {
            operation: "fetch".to_string(),
            detail: "dns lookup failed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("fetch"));
        assert!(msg.contains("dns lookup failed"));
    }

    #[test]
    fn test_error_display_parse() {
        let err = MonitorError::Parse {
            url: "https://example.test/t".to_string(),
            detail: "no timetable table".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Parse error for https://example.test/t: no timetable table"
        );
    }

    #[test]
    fn test_error_display_config() {
        let err = MonitorError::Config {
            summary: "2 invalid fields".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration invalid: 2 invalid fields");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: MonitorError = io_err.into();
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid}").unwrap_err();
        let err: MonitorError = json_err.into();
        assert!(err.to_string().contains("Failed to parse JSON"));
    }

    // ── categories ────────────────────────────────────────────────────────

    #[test]
    fn test_categories() {
        assert_eq!(
            MonitorError::Network {
                operation: "fetch".into(),
                detail: "x".into()
            }
            .category(),
            ErrorCategory::Network
        );
        assert_eq!(
            MonitorError::RateLimited { retry_after: None }.category(),
            ErrorCategory::Network
        );
        assert_eq!(
            MonitorError::Parse {
                url: "u".into(),
                detail: "d".into()
            }
            .category(),
            ErrorCategory::Parse
        );
        assert_eq!(
            MonitorError::Config {
                summary: "s".into()
            }
            .category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            MonitorError::Notification {
                channel: "telegram".into(),
                detail: "500".into()
            }
            .category(),
            ErrorCategory::Notification
        );
        assert_eq!(
            MonitorError::Critical("impossible".into()).category(),
            ErrorCategory::Critical
        );
    }

    #[test]
    fn test_signature_stable_for_same_failure() {
        let a = MonitorError::Network {
            operation: "fetch".into(),
            detail: "timeout after 30s".into(),
        };
        let b = MonitorError::Network {
            operation: "fetch".into(),
            detail: "timeout after 31s".into(),
        };
        // Detail differs, signature does not.
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn test_signature_distinguishes_channels() {
        let a = MonitorError::Notification {
            channel: "telegram".into(),
            detail: "500".into(),
        };
        let b = MonitorError::Notification {
            channel: "desktop".into(),
            detail: "500".into(),
        };
        assert_ne!(a.signature(), b.signature());
    }

    // ── context ───────────────────────────────────────────────────────────

    #[test]
    fn test_error_context_builder() {
        let ctx = ErrorContext::new("fetch", "scheduler").with_session("sess-1");
        assert_eq!(ctx.operation, "fetch");
        assert_eq!(ctx.component, "scheduler");
        assert_eq!(ctx.session_id.as_deref(), Some("sess-1"));
    }
}

//! Monitor configuration: file loading, environment overlay, validation.
//!
//! Configuration lives in a JSON file (default `config/monitor-config.json`)
//! and is shadowed by environment variables for deploy-time overrides.
//! Validation is total: an invalid config is rejected with field-level
//! errors, never silently accepted.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Defaults and bounds ───────────────────────────────────────────────────────

/// Default poll interval between checks (5 minutes).
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 300_000;

/// Minimum permitted poll interval.
pub const MIN_CHECK_INTERVAL_MS: u64 = 5_000;

/// Maximum permitted poll interval (1 hour).
pub const MAX_CHECK_INTERVAL_MS: u64 = 3_600_000;

/// Default timetable base URL.
pub const DEFAULT_BASE_URL: &str = "https://irsafam.org/ielts/timetable";

/// Days a slot stays tracked after it was last seen.
pub const DEFAULT_MAX_TRACKING_DAYS: i64 = 30;

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_MS
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_max_tracking_days() -> i64 {
    DEFAULT_MAX_TRACKING_DAYS
}

fn default_true() -> bool {
    true
}

// ── Nested settings ───────────────────────────────────────────────────────────

/// Which delivery channels the dispatcher may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    /// Host desktop notification (notify-send / osascript / powershell).
    pub desktop: bool,
    /// System sound.
    pub audio: bool,
    /// Structured line appended to `notifications.log`.
    pub log_file: bool,
    /// Telegram Bot API message.
    pub telegram: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            desktop: true,
            audio: true,
            log_file: true,
            telegram: false,
        }
    }
}

impl NotificationSettings {
    /// `true` when at least one channel is enabled.
    pub fn any_enabled(&self) -> bool {
        self.desktop || self.audio || self.log_file || self.telegram
    }

    /// Names of the enabled channels, in dispatch order.
    pub fn enabled_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.desktop {
            names.push("desktop");
        }
        if self.audio {
            names.push("audio");
        }
        if self.log_file {
            names.push("log-file");
        }
        if self.telegram {
            names.push("telegram");
        }
        names
    }
}

/// Log level names accepted by the status log and the tracing filter.
pub const LOG_LEVELS: [&str; 4] = ["error", "warn", "info", "debug"];

/// Security-related knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecuritySettings {
    /// Mask bot tokens / chat ids in every log line.
    pub mask_sensitive_data: bool,
    /// Minimum level written to the status log.
    pub log_level: String,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            mask_sensitive_data: true,
            log_level: "info".to_string(),
        }
    }
}

/// Optional embedded-server settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Port for the `GET /health` listener; `None` disables it.
    pub health_check_port: Option<u16>,
}

/// Per-suspension-point timeouts, in milliseconds.
///
/// Every point where the loop can block carries its own bound: the fetcher
/// call, one telegram delivery, and each local channel (desktop, audio, log
/// file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutSettings {
    /// Bound on a single fetcher call.
    pub fetch_ms: u64,
    /// Bound on one telegram delivery attempt chain.
    pub telegram_ms: u64,
    /// Bound on each local channel delivery.
    pub local_channel_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            fetch_ms: 30_000,
            telegram_ms: 10_000,
            local_channel_ms: 2_000,
        }
    }
}

impl TimeoutSettings {
    pub fn fetch(&self) -> Duration {
        Duration::from_millis(self.fetch_ms)
    }

    pub fn telegram(&self) -> Duration {
        Duration::from_millis(self.telegram_ms)
    }

    pub fn local_channel(&self) -> Duration {
        Duration::from_millis(self.local_channel_ms)
    }
}

/// How Telegram messages are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelegramMessageFormat {
    /// One-line summary per slot.
    Simple,
    /// Full per-slot details with registration links.
    #[default]
    Detailed,
}

/// Telegram delivery settings.
///
/// The token and chat id are deliberately *not* read from the config file;
/// they come from `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID` so credentials
/// never land on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramSettings {
    /// Bot API token.
    #[serde(skip_serializing)]
    pub bot_token: Option<String>,
    /// Target chat: a user id, or a channel if prefixed `@` or `-100`.
    pub chat_id: Option<String>,
    /// Message rendering style.
    pub message_format: TelegramMessageFormat,
    /// Whether link previews are shown.
    pub enable_preview: bool,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            message_format: TelegramMessageFormat::default(),
            enable_preview: default_true(),
        }
    }
}

impl TelegramSettings {
    /// `true` when the configured chat id addresses a channel rather than a
    /// direct user chat.
    pub fn is_channel(&self) -> bool {
        match self.chat_id.as_deref() {
            Some(id) => id.starts_with('@') || id.starts_with("-100"),
            None => false,
        }
    }
}

// ── MonitorConfig ─────────────────────────────────────────────────────────────

/// Complete monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    /// Cities to watch.
    pub cities: BTreeSet<String>,
    /// Exam models to watch, e.g. `"cdielts"`.
    pub exam_models: BTreeSet<String>,
    /// Months (1-12) to watch.
    pub months: BTreeSet<u8>,
    /// Poll interval in milliseconds.
    pub check_interval: u64,
    /// Timetable base URL.
    pub base_url: String,
    /// Days a slot stays tracked after disappearing from fetches.
    pub max_tracking_days: i64,
    /// Enabled delivery channels.
    pub notification_settings: NotificationSettings,
    /// Masking and log-level knobs.
    pub security: SecuritySettings,
    /// Optional health endpoint.
    pub server: ServerSettings,
    /// Per-suspension-point timeouts.
    pub timeouts: TimeoutSettings,
    /// Telegram delivery settings (credentials from the environment).
    pub telegram: TelegramSettings,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cities: BTreeSet::from(["isfahan".to_string()]),
            exam_models: BTreeSet::from(["cdielts".to_string()]),
            months: BTreeSet::new(),
            check_interval: default_check_interval(),
            base_url: default_base_url(),
            max_tracking_days: default_max_tracking_days(),
            notification_settings: NotificationSettings::default(),
            security: SecuritySettings::default(),
            server: ServerSettings::default(),
            timeouts: TimeoutSettings::default(),
            telegram: TelegramSettings::default(),
        }
    }
}

// ── Validation ────────────────────────────────────────────────────────────────

/// One field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigFieldError {
    /// Dotted path of the offending field.
    pub field: String,
    /// Human-readable description of the problem.
    pub message: String,
}

impl std::fmt::Display for ConfigFieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl MonitorConfig {
    /// Validate every field, returning the full list of problems.
    ///
    /// Validation never short-circuits so the caller can surface all errors
    /// at once.
    pub fn validate(&self) -> Result<(), Vec<ConfigFieldError>> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ConfigFieldError {
                field: field.to_string(),
                message,
            });
        };

        if self.cities.is_empty() {
            push("cities", "at least one city is required".to_string());
        }
        if self.cities.iter().any(|c| c.trim().is_empty()) {
            push("cities", "city names must be non-empty".to_string());
        }

        if self.exam_models.is_empty() {
            push("examModels", "at least one exam model is required".to_string());
        }

        for month in &self.months {
            if !(1..=12).contains(month) {
                push("months", format!("month {month} is out of range 1-12"));
            }
        }

        if !(MIN_CHECK_INTERVAL_MS..=MAX_CHECK_INTERVAL_MS).contains(&self.check_interval) {
            push(
                "checkInterval",
                format!(
                    "{} ms is outside the permitted range {}-{} ms",
                    self.check_interval, MIN_CHECK_INTERVAL_MS, MAX_CHECK_INTERVAL_MS
                ),
            );
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            push(
                "baseUrl",
                format!("'{}' is not an http(s) URL", self.base_url),
            );
        }

        if self.max_tracking_days <= 0 {
            push(
                "maxTrackingDays",
                format!("{} must be positive", self.max_tracking_days),
            );
        }

        if !self.notification_settings.any_enabled() {
            push(
                "notificationSettings",
                "at least one notification channel must be enabled".to_string(),
            );
        }

        for (field, value) in [
            ("timeouts.fetchMs", self.timeouts.fetch_ms),
            ("timeouts.telegramMs", self.timeouts.telegram_ms),
            ("timeouts.localChannelMs", self.timeouts.local_channel_ms),
        ] {
            if value == 0 {
                push(field, "timeout must be positive".to_string());
            }
        }

        if !LOG_LEVELS.contains(&self.security.log_level.as_str()) {
            push(
                "security.logLevel",
                format!(
                    "'{}' is not one of {}",
                    self.security.log_level,
                    LOG_LEVELS.join(", ")
                ),
            );
        }

        if self.notification_settings.telegram {
            if self.telegram.bot_token.as_deref().unwrap_or("").is_empty() {
                push(
                    "telegram.botToken",
                    "telegram channel is enabled but TELEGRAM_BOT_TOKEN is not set".to_string(),
                );
            }
            if self.telegram.chat_id.as_deref().unwrap_or("").is_empty() {
                push(
                    "telegram.chatId",
                    "telegram channel is enabled but TELEGRAM_CHAT_ID is not set".to_string(),
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    // ── Loading ───────────────────────────────────────────────────────────

    /// Load configuration from a JSON file, then overlay the environment.
    ///
    /// A missing file yields the defaults (plus overlay); a present but
    /// unreadable or malformed file is an error.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let mut config = if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|source| crate::error::MonitorError::FileRead {
                    path: path.to_path_buf(),
                    source,
                })?;
            serde_json::from_str::<Self>(&content)?
        } else {
            tracing::debug!(path = %path.display(), "config file absent; using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Overlay recognised environment variables onto this config.
    ///
    /// Unset variables leave the file/default value in place; set-but-invalid
    /// numeric values are ignored with a warning rather than aborting.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_string("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(v);
        }
        if let Some(v) = env_string("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = Some(v);
        }
        if let Some(v) = env_string("TELEGRAM_MESSAGE_FORMAT") {
            self.telegram.message_format = match v.to_lowercase().as_str() {
                "simple" => TelegramMessageFormat::Simple,
                "detailed" => TelegramMessageFormat::Detailed,
                other => {
                    tracing::warn!(value = other, "unrecognised TELEGRAM_MESSAGE_FORMAT; keeping current");
                    self.telegram.message_format
                }
            };
        }
        if let Some(v) = env_bool("TELEGRAM_ENABLE_PREVIEW") {
            self.telegram.enable_preview = v;
        }

        if let Some(v) = env_string("MONITOR_CHECK_INTERVAL") {
            match v.parse::<u64>() {
                Ok(ms) => self.check_interval = ms,
                Err(_) => tracing::warn!(value = %v, "MONITOR_CHECK_INTERVAL is not a number; ignoring"),
            }
        }
        if let Some(v) = env_string("MONITOR_CITIES") {
            self.cities = split_list(&v);
        }
        if let Some(v) = env_string("MONITOR_EXAM_MODELS") {
            self.exam_models = split_list(&v);
        }
        if let Some(v) = env_string("MONITOR_MONTHS") {
            self.months = v
                .split(',')
                .filter_map(|part| part.trim().parse::<u8>().ok())
                .collect();
        }
        if let Some(v) = env_string("MONITOR_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = env_string("MONITOR_LOG_LEVEL") {
            self.security.log_level = v.to_lowercase();
        }
        if let Some(v) = env_bool("MASK_SENSITIVE_DATA").or_else(|| env_bool("ENABLE_SECURE_LOGGING")) {
            self.security.mask_sensitive_data = v;
        }
        if let Some(v) = env_string("HEALTH_CHECK_PORT") {
            match v.parse::<u16>() {
                Ok(port) => self.server.health_check_port = Some(port),
                Err(_) => tracing::warn!(value = %v, "HEALTH_CHECK_PORT is not a port; ignoring"),
            }
        }

        for (key, slot) in [
            ("MONITOR_FETCH_TIMEOUT", &mut self.timeouts.fetch_ms),
            ("MONITOR_TELEGRAM_TIMEOUT", &mut self.timeouts.telegram_ms),
            (
                "MONITOR_LOCAL_CHANNEL_TIMEOUT",
                &mut self.timeouts.local_channel_ms,
            ),
        ] {
            if let Some(v) = env_string(key) {
                match v.parse::<u64>() {
                    Ok(ms) => *slot = ms,
                    Err(_) => tracing::warn!(key, value = %v, "timeout override is not a number; ignoring"),
                }
            }
        }
    }

    /// Serialize to the snapshot stored on a [`crate::models::Session`].
    ///
    /// The telegram token is skipped by its serde attribute, so snapshots
    /// are safe to persist.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

// ── Env helpers ───────────────────────────────────────────────────────────────

fn env_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn split_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|part| part.trim().to_lowercase())
        .filter(|part| !part.is_empty())
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ──────────────────────────────────────────────────────────

    #[test]
    fn test_default_config_is_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.check_interval, DEFAULT_CHECK_INTERVAL_MS);
        assert!(config.notification_settings.desktop);
        assert!(!config.notification_settings.telegram);
    }

    #[test]
    fn test_enabled_names_order() {
        let settings = NotificationSettings {
            desktop: true,
            audio: false,
            log_file: true,
            telegram: true,
        };
        assert_eq!(settings.enabled_names(), vec!["desktop", "log-file", "telegram"]);
    }

    // ── validation ────────────────────────────────────────────────────────

    #[test]
    fn test_validate_rejects_empty_cities() {
        let mut config = MonitorConfig::default();
        config.cities.clear();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "cities"));
    }

    #[test]
    fn test_validate_rejects_out_of_range_interval() {
        let mut config = MonitorConfig::default();
        config.check_interval = 1_000;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "checkInterval"));

        config.check_interval = MAX_CHECK_INTERVAL_MS + 1;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "checkInterval"));
    }

    #[test]
    fn test_validate_rejects_bad_month() {
        let mut config = MonitorConfig::default();
        config.months.insert(0);
        config.months.insert(13);
        let errors = config.validate().unwrap_err();
        let month_errors: Vec<_> = errors.iter().filter(|e| e.field == "months").collect();
        assert_eq!(month_errors.len(), 2);
    }

    #[test]
    fn test_validate_rejects_all_channels_disabled() {
        let mut config = MonitorConfig::default();
        config.notification_settings = NotificationSettings {
            desktop: false,
            audio: false,
            log_file: false,
            telegram: false,
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "notificationSettings"));
    }

    #[test]
    fn test_validate_rejects_non_http_base_url() {
        let mut config = MonitorConfig::default();
        config.base_url = "ftp://example.test".to_string();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "baseUrl"));
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let mut config = MonitorConfig::default();
        config.security.log_level = "verbose".to_string();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "security.logLevel"));
    }

    #[test]
    fn test_validate_telegram_requires_credentials() {
        let mut config = MonitorConfig::default();
        config.notification_settings.telegram = true;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "telegram.botToken"));
        assert!(errors.iter().any(|e| e.field == "telegram.chatId"));

        config.telegram.bot_token = Some("123456:abcdef".to_string());
        config.telegram.chat_id = Some("@channel".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = MonitorConfig::default();
        config.cities.clear();
        config.exam_models.clear();
        config.check_interval = 0;
        let errors = config.validate().unwrap_err();
        assert!(errors.len() >= 3, "expected all errors, got {errors:?}");
    }

    // ── timeouts ──────────────────────────────────────────────────────────

    #[test]
    fn test_timeout_defaults_match_contract() {
        let timeouts = TimeoutSettings::default();
        assert_eq!(timeouts.fetch(), Duration::from_secs(30));
        assert_eq!(timeouts.telegram(), Duration::from_secs(10));
        assert_eq!(timeouts.local_channel(), Duration::from_secs(2));
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = MonitorConfig::default();
        config.timeouts.fetch_ms = 0;
        config.timeouts.telegram_ms = 0;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "timeouts.fetchMs"));
        assert!(errors.iter().any(|e| e.field == "timeouts.telegramMs"));
        assert!(!errors.iter().any(|e| e.field == "timeouts.localChannelMs"));
    }

    #[test]
    fn test_timeouts_read_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("monitor-config.json");
        std::fs::write(
            &path,
            r#"{ "timeouts": {"fetchMs": 15000, "telegramMs": 40000} }"#,
        )
        .unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.timeouts.fetch_ms, 15_000);
        assert_eq!(config.timeouts.telegram_ms, 40_000);
        // Unset fields keep their defaults.
        assert_eq!(config.timeouts.local_channel_ms, 2_000);
    }

    // ── telegram helpers ──────────────────────────────────────────────────

    #[test]
    fn test_is_channel_detection() {
        let mut settings = TelegramSettings::default();
        assert!(!settings.is_channel());

        settings.chat_id = Some("@ielts_alerts".to_string());
        assert!(settings.is_channel());

        settings.chat_id = Some("-1001234567890".to_string());
        assert!(settings.is_channel());

        settings.chat_id = Some("987654321".to_string());
        assert!(!settings.is_channel());
    }

    // ── file loading ──────────────────────────────────────────────────────

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = MonitorConfig::load(&dir.path().join("monitor-config.json")).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_load_reads_camel_case_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("monitor-config.json");
        std::fs::write(
            &path,
            r#"{
                "cities": ["tehran", "isfahan"],
                "examModels": ["ukvi"],
                "months": [10, 11],
                "checkInterval": 60000,
                "notificationSettings": {"desktop": false, "audio": false, "logFile": true, "telegram": false}
            }"#,
        )
        .unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.cities.len(), 2);
        assert!(config.exam_models.contains("ukvi"));
        assert_eq!(config.check_interval, 60_000);
        assert!(!config.notification_settings.desktop);
        assert!(config.notification_settings.log_file);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("monitor-config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(MonitorConfig::load(&path).is_err());
    }

    #[test]
    fn test_snapshot_omits_bot_token() {
        let mut config = MonitorConfig::default();
        config.telegram.bot_token = Some("123456:secret-token-value".to_string());
        let snapshot = serde_json::to_string(&config.snapshot()).unwrap();
        assert!(!snapshot.contains("secret-token-value"));
    }

    #[test]
    fn test_split_list_normalises() {
        let set = split_list("Tehran, Isfahan , ,shiraz");
        assert_eq!(set.len(), 3);
        assert!(set.contains("tehran"));
        assert!(set.contains("shiraz"));
    }
}

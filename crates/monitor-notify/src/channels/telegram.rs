//! Telegram delivery via the Bot HTTP API.
//!
//! Sends one `sendMessage` call per notification in HTML parse mode.
//! Transient failures (5xx, transport) are retried with exponential backoff
//! (1 s, 2 s, 4 s); client errors are permanent; 429 waits for the
//! server-provided `retry_after` instead. The bot token is masked in every
//! log line.

use std::time::Duration;

use async_trait::async_trait;
use monitor_core::config::{TelegramMessageFormat, TelegramSettings};
use monitor_core::error::{MonitorError, Result};
use monitor_core::masking;
use monitor_core::models::Appointment;
use reqwest::StatusCode;
use serde::Deserialize;

use super::NotificationChannel;
use crate::message;

/// Retries after the initial attempt, with 1 s / 2 s / 4 s waits.
const MAX_RETRIES: u32 = 3;

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ── API response shapes ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ApiParameters>,
}

#[derive(Debug, Deserialize)]
struct ApiParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

// ── Retry decision ────────────────────────────────────────────────────────────

/// What to do after one failed attempt.
#[derive(Debug, PartialEq)]
enum Verdict {
    /// Wait the given duration, then try again.
    Retry(Duration),
    /// The failure is permanent; stop.
    Permanent(String),
}

/// Backoff before retry number `retry` (1-based): 1 s, 2 s, 4 s.
fn backoff(retry: u32) -> Duration {
    Duration::from_secs(1 << (retry - 1).min(2))
}

/// Decide retry behaviour from an HTTP status and optional `retry_after`.
///
/// `retry` is the 1-based number of the retry that would follow.
fn verdict_for(status: StatusCode, retry_after: Option<u64>, retry: u32) -> Verdict {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Verdict::Retry(
            retry_after.map(Duration::from_secs).unwrap_or_else(|| backoff(retry)),
        );
    }
    if status.is_client_error() {
        return Verdict::Permanent(format!("telegram rejected the request: {status}"));
    }
    Verdict::Retry(backoff(retry))
}

// ── TelegramChannel ───────────────────────────────────────────────────────────

/// Telegram Bot API channel.
pub struct TelegramChannel {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
    format: TelegramMessageFormat,
    enable_preview: bool,
}

impl TelegramChannel {
    /// Build a channel from validated [`TelegramSettings`].
    ///
    /// Fails when the token or chat id is missing; config validation should
    /// have caught that earlier.
    pub fn new(settings: &TelegramSettings) -> Result<Self> {
        let bot_token = settings
            .bot_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| MonitorError::Config {
                summary: "telegram channel requires TELEGRAM_BOT_TOKEN".to_string(),
            })?;
        let chat_id = settings
            .chat_id
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| MonitorError::Config {
                summary: "telegram channel requires TELEGRAM_CHAT_ID".to_string(),
            })?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MonitorError::Network {
                operation: "telegram-client".to_string(),
                detail: e.to_string(),
            })?;

        Ok(Self {
            http,
            api_base: "https://api.telegram.org".to_string(),
            bot_token,
            chat_id,
            format: settings.message_format,
            enable_preview: settings.enable_preview,
        })
    }

    /// Point the channel at a different API host (used by tests).
    #[doc(hidden)]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn send_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": !self.enable_preview,
        })
    }

    /// Send a free-form message, with the channel's retry policy.
    ///
    /// Used both for slot notifications and for the `telegram-test` command.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let body = self.request_body(text);
        let masked_chat = masking::mask_secret(&self.chat_id);

        // One initial attempt plus MAX_RETRIES retries.
        let mut retries: u32 = 0;
        loop {
            let failure = match self.http.post(self.send_url()).json(&body).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        tracing::info!(chat_id = %masked_chat, "telegram message delivered");
                        return Ok(());
                    }

                    let api: Option<ApiResponse> = resp.json().await.ok();
                    let retry_after = api
                        .as_ref()
                        .and_then(|r| r.parameters.as_ref())
                        .and_then(|p| p.retry_after);
                    let description = api
                        .as_ref()
                        .filter(|r| !r.ok)
                        .and_then(|r| r.description.clone())
                        .unwrap_or_else(|| status.to_string());

                    match verdict_for(status, retry_after, retries + 1) {
                        Verdict::Permanent(detail) => {
                            tracing::warn!(
                                chat_id = %masked_chat,
                                detail = %masking::mask_text(&description),
                                "telegram delivery permanently failed"
                            );
                            return Err(MonitorError::Notification {
                                channel: "telegram".to_string(),
                                detail,
                            });
                        }
                        Verdict::Retry(wait) => (masking::mask_text(&description), wait),
                    }
                }
                Err(e) => {
                    let wait = backoff(retries + 1);
                    // Transport errors can embed the request URL, token included.
                    (masking::mask_text(&e.to_string()), wait)
                }
            };

            let (detail, wait) = failure;
            retries += 1;
            if retries > MAX_RETRIES {
                return Err(MonitorError::Notification {
                    channel: "telegram".to_string(),
                    detail: format!("gave up after {} attempts: {detail}", MAX_RETRIES + 1),
                });
            }
            tracing::debug!(retry = retries, wait_secs = wait.as_secs(), "telegram retry");
            tokio::time::sleep(wait).await;
        }
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn deliver(&self, slots: &[Appointment]) -> Result<()> {
        let text = message::telegram_text(slots, self.format);
        self.send_text(&text).await
    }

    async fn deliver_alert(&self, title: &str, body: &str) -> Result<()> {
        let text = format!(
            "<b>⚠️ {}</b>\n{}",
            title.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;"),
            body.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
        );
        self.send_text(&text).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TelegramSettings {
        TelegramSettings {
            bot_token: Some("123456789:AAHtestTOKENtestTOKENtestTOKEN00".to_string()),
            chat_id: Some("-1001234567890".to_string()),
            message_format: TelegramMessageFormat::Simple,
            enable_preview: false,
        }
    }

    // ── construction ──────────────────────────────────────────────────────

    #[test]
    fn test_new_requires_token_and_chat() {
        let mut missing_token = settings();
        missing_token.bot_token = None;
        assert!(TelegramChannel::new(&missing_token).is_err());

        let mut missing_chat = settings();
        missing_chat.chat_id = Some(String::new());
        assert!(TelegramChannel::new(&missing_chat).is_err());

        assert!(TelegramChannel::new(&settings()).is_ok());
    }

    #[test]
    fn test_send_url_contains_token() {
        let channel = TelegramChannel::new(&settings())
            .unwrap()
            .with_api_base("http://127.0.0.1:9999");
        assert_eq!(
            channel.send_url(),
            "http://127.0.0.1:9999/bot123456789:AAHtestTOKENtestTOKENtestTOKEN00/sendMessage"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let channel = TelegramChannel::new(&settings()).unwrap();
        let body = channel.request_body("<b>hi</b>");
        assert_eq!(body["chat_id"], "-1001234567890");
        assert_eq!(body["parse_mode"], "HTML");
        // Preview disabled in settings → disable flag set.
        assert_eq!(body["disable_web_page_preview"], true);
    }

    // ── retry verdicts ────────────────────────────────────────────────────

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(4));
        // Clamped beyond the schedule.
        assert_eq!(backoff(9), Duration::from_secs(4));
    }

    #[test]
    fn test_verdict_5xx_retries_with_backoff() {
        assert_eq!(
            verdict_for(StatusCode::INTERNAL_SERVER_ERROR, None, 1),
            Verdict::Retry(Duration::from_secs(1))
        );
        assert_eq!(
            verdict_for(StatusCode::BAD_GATEWAY, None, 2),
            Verdict::Retry(Duration::from_secs(2))
        );
        assert_eq!(
            verdict_for(StatusCode::SERVICE_UNAVAILABLE, None, 3),
            Verdict::Retry(Duration::from_secs(4))
        );
    }

    #[test]
    fn test_verdict_4xx_is_permanent() {
        assert!(matches!(
            verdict_for(StatusCode::BAD_REQUEST, None, 1),
            Verdict::Permanent(_)
        ));
        assert!(matches!(
            verdict_for(StatusCode::UNAUTHORIZED, None, 1),
            Verdict::Permanent(_)
        ));
    }

    #[test]
    fn test_verdict_429_honours_retry_after() {
        assert_eq!(
            verdict_for(StatusCode::TOO_MANY_REQUESTS, Some(17), 1),
            Verdict::Retry(Duration::from_secs(17))
        );
        // Without the hint, fall back to the backoff schedule.
        assert_eq!(
            verdict_for(StatusCode::TOO_MANY_REQUESTS, None, 2),
            Verdict::Retry(Duration::from_secs(2))
        );
    }
}

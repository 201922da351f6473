//! Channel fan-out for one notification.
//!
//! [`Dispatcher::send`] delivers a set of *available* slots through the
//! enabled channels concurrently and reports per-channel success. Channels
//! never cancel each other: the fan-out is joined all-settled, each leg
//! bounded by its own timeout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use monitor_core::config::{MonitorConfig, NotificationSettings, TimeoutSettings};
use monitor_core::error::Result;
use monitor_core::models::{Appointment, AppointmentStatus};
use serde::Serialize;

use crate::channels::{
    AudioChannel, DesktopChannel, LogFileChannel, NotificationChannel, TelegramChannel,
};

// ── DeliveryReport ────────────────────────────────────────────────────────────

/// Outcome for one channel leg.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelDelivery {
    pub channel: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated delivery outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Every enabled channel succeeded.
    Success,
    /// At least one succeeded and at least one failed.
    Partial,
    /// Every enabled channel failed (or nothing was deliverable).
    Failed,
}

/// What [`Dispatcher::send`] returns to the scheduler.
///
/// On `Success` or `Partial` the scheduler marks the slots notified; on
/// `Failed` it must not, so the next cycle retries them.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub timestamp: DateTime<Utc>,
    pub appointment_count: usize,
    pub channels: Vec<ChannelDelivery>,
    pub delivery_status: DeliveryStatus,
    pub per_channel_errors: BTreeMap<String, String>,
    /// Set when the dispatch never reached any channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl DeliveryReport {
    fn not_dispatched(reason: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            appointment_count: 0,
            channels: Vec::new(),
            delivery_status: DeliveryStatus::Failed,
            per_channel_errors: BTreeMap::new(),
            failure_reason: Some(reason.to_string()),
        }
    }

    /// `true` when the scheduler should mark the slots notified.
    pub fn delivered(&self) -> bool {
        matches!(
            self.delivery_status,
            DeliveryStatus::Success | DeliveryStatus::Partial
        )
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Notification fan-out over the configured channels.
pub struct Dispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
    /// Per-channel delivery bounds (10 s telegram, 2 s local by default).
    timeouts: TimeoutSettings,
}

impl Dispatcher {
    /// Build a dispatcher with an explicit channel set and default timeouts
    /// (tests use mocks).
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self {
            channels,
            timeouts: TimeoutSettings::default(),
        }
    }

    /// Override the per-channel delivery bounds.
    pub fn with_timeouts(mut self, timeouts: TimeoutSettings) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Build the production channel set from the configuration.
    ///
    /// The telegram channel is only constructed when enabled, so a missing
    /// token does not prevent running with local channels.
    pub fn from_config(config: &MonitorConfig, notifications_log: std::path::PathBuf) -> Result<Self> {
        let mut channels: Vec<Arc<dyn NotificationChannel>> = vec![
            Arc::new(DesktopChannel::new()),
            Arc::new(AudioChannel::new()),
            Arc::new(LogFileChannel::new(notifications_log)),
        ];
        if config.notification_settings.telegram {
            channels.push(Arc::new(TelegramChannel::new(&config.telegram)?));
        }
        Ok(Self::new(channels).with_timeouts(config.timeouts))
    }

    /// The delivery bound for a channel, by name.
    fn timeout_for(&self, channel: &str) -> Duration {
        match channel {
            "telegram" => self.timeouts.telegram(),
            _ => self.timeouts.local_channel(),
        }
    }

    /// Deliver one notification for `slots` through the channels enabled in
    /// `settings`.
    ///
    /// Non-available slots are filtered out here again regardless of what the
    /// caller already checked; an empty remainder fails the dispatch without
    /// touching any channel.
    pub async fn send(
        &self,
        slots: &[Appointment],
        settings: &NotificationSettings,
    ) -> DeliveryReport {
        let available: Vec<Appointment> = slots
            .iter()
            .filter(|slot| slot.status == AppointmentStatus::Available)
            .cloned()
            .collect();

        if available.len() < slots.len() {
            tracing::warn!(
                dropped = slots.len() - available.len(),
                "dispatcher dropped non-available slots"
            );
        }
        if available.is_empty() {
            return DeliveryReport::not_dispatched("no-available-after-filter");
        }

        let enabled = settings.enabled_names();
        if enabled.is_empty() {
            return DeliveryReport::not_dispatched("no-channels-enabled");
        }

        let mut legs = Vec::new();
        let mut missing: Vec<&str> = Vec::new();
        for name in &enabled {
            match self.channels.iter().find(|c| c.name() == *name) {
                Some(channel) => {
                    let channel = Arc::clone(channel);
                    let slots = available.clone();
                    let timeout = self.timeout_for(channel.name());
                    legs.push(async move {
                        let outcome =
                            tokio::time::timeout(timeout, channel.deliver(&slots)).await;
                        match outcome {
                            Ok(Ok(())) => ChannelDelivery {
                                channel: channel.name().to_string(),
                                success: true,
                                error: None,
                            },
                            Ok(Err(e)) => ChannelDelivery {
                                channel: channel.name().to_string(),
                                success: false,
                                error: Some(e.to_string()),
                            },
                            Err(_) => ChannelDelivery {
                                channel: channel.name().to_string(),
                                success: false,
                                error: Some("delivery timed out".to_string()),
                            },
                        }
                    });
                }
                None => missing.push(*name),
            }
        }

        let mut deliveries = join_all(legs).await;
        for name in missing {
            deliveries.push(ChannelDelivery {
                channel: name.to_string(),
                success: false,
                error: Some("channel not configured".to_string()),
            });
        }

        let succeeded = deliveries.iter().filter(|d| d.success).count();
        let failed = deliveries.len() - succeeded;
        let delivery_status = if failed == 0 {
            DeliveryStatus::Success
        } else if succeeded > 0 {
            DeliveryStatus::Partial
        } else {
            DeliveryStatus::Failed
        };

        let per_channel_errors: BTreeMap<String, String> = deliveries
            .iter()
            .filter_map(|d| d.error.as_ref().map(|e| (d.channel.clone(), e.clone())))
            .collect();

        for delivery in deliveries.iter().filter(|d| !d.success) {
            tracing::warn!(
                channel = %delivery.channel,
                error = delivery.error.as_deref().unwrap_or("unknown"),
                "notification channel failed"
            );
        }
        if delivery_status == DeliveryStatus::Failed {
            // Last-resort fallback so the user still sees the alert somewhere.
            eprintln!(
                "[ielts-monitor] {} available slot(s) found but every notification channel failed",
                available.len()
            );
        }

        DeliveryReport {
            timestamp: Utc::now(),
            appointment_count: available.len(),
            channels: deliveries,
            delivery_status,
            per_channel_errors,
            failure_reason: None,
        }
    }

    /// Deliver a high-severity text alert through the enabled channels.
    ///
    /// Used for persistent-error escalation. Returns `true` when at least
    /// one channel accepted the alert.
    pub async fn send_alert(
        &self,
        title: &str,
        body: &str,
        settings: &NotificationSettings,
    ) -> bool {
        let enabled = settings.enabled_names();
        let legs: Vec<_> = self
            .channels
            .iter()
            .filter(|channel| enabled.contains(&channel.name()))
            .map(|channel| {
                let channel = Arc::clone(channel);
                let title = title.to_string();
                let body = body.to_string();
                let timeout = self.timeout_for(channel.name());
                async move {
                    tokio::time::timeout(timeout, channel.deliver_alert(&title, &body))
                        .await
                        .map(|outcome| outcome.is_ok())
                        .unwrap_or(false)
                }
            })
            .collect();

        let delivered = join_all(legs).await.into_iter().any(|ok| ok);
        if !delivered {
            eprintln!("[ielts-monitor] ALERT: {title}: {body}");
        }
        delivered
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use monitor_core::error::MonitorError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ── mock channels ─────────────────────────────────────────────────────

    struct MockChannel {
        name: &'static str,
        fail: bool,
        calls: AtomicUsize,
    }

    impl MockChannel {
        fn ok(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotificationChannel for MockChannel {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn deliver(&self, _slots: &[Appointment]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(MonitorError::Notification {
                    channel: self.name.to_string(),
                    detail: "mock failure".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn slot(id: &str, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: id.to_string(),
            date: "2025-10-04".to_string(),
            time: "09:00-12:00".to_string(),
            city: "Isfahan".to_string(),
            exam_type: "CDIELTS".to_string(),
            location: "Safir Office".to_string(),
            status,
            price: None,
            registration_url: None,
        }
    }

    fn all_local() -> NotificationSettings {
        NotificationSettings {
            desktop: true,
            audio: true,
            log_file: true,
            telegram: false,
        }
    }

    // ── aggregation ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_all_channels_succeed_reports_success() {
        let desktop = MockChannel::ok("desktop");
        let audio = MockChannel::ok("audio");
        let log = MockChannel::ok("log-file");
        let dispatcher = Dispatcher::new(vec![
            desktop.clone() as Arc<dyn NotificationChannel>,
            audio.clone(),
            log.clone(),
        ]);

        let report = dispatcher
            .send(&[slot("a", AppointmentStatus::Available)], &all_local())
            .await;

        assert_eq!(report.delivery_status, DeliveryStatus::Success);
        assert!(report.delivered());
        assert_eq!(report.appointment_count, 1);
        assert_eq!(report.channels.len(), 3);
        assert!(report.per_channel_errors.is_empty());
        assert_eq!(desktop.calls(), 1);
        assert_eq!(audio.calls(), 1);
        assert_eq!(log.calls(), 1);
    }

    #[tokio::test]
    async fn test_mixed_outcome_reports_partial() {
        let dispatcher = Dispatcher::new(vec![
            MockChannel::ok("desktop") as Arc<dyn NotificationChannel>,
            MockChannel::failing("audio"),
            MockChannel::ok("log-file"),
        ]);

        let report = dispatcher
            .send(&[slot("a", AppointmentStatus::Available)], &all_local())
            .await;

        assert_eq!(report.delivery_status, DeliveryStatus::Partial);
        assert!(report.delivered());
        assert_eq!(report.per_channel_errors.len(), 1);
        assert!(report.per_channel_errors.contains_key("audio"));
    }

    #[tokio::test]
    async fn test_all_failed_reports_failed() {
        let dispatcher = Dispatcher::new(vec![
            MockChannel::failing("desktop") as Arc<dyn NotificationChannel>,
            MockChannel::failing("audio"),
            MockChannel::failing("log-file"),
        ]);

        let report = dispatcher
            .send(&[slot("a", AppointmentStatus::Available)], &all_local())
            .await;

        assert_eq!(report.delivery_status, DeliveryStatus::Failed);
        assert!(!report.delivered());
        assert_eq!(report.per_channel_errors.len(), 3);
    }

    // ── timeouts ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_configured_timeout_bounds_a_slow_channel() {
        struct SlowChannel;

        #[async_trait]
        impl NotificationChannel for SlowChannel {
            fn name(&self) -> &'static str {
                "desktop"
            }

            async fn deliver(&self, _slots: &[Appointment]) -> Result<()> {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            }
        }

        let dispatcher = Dispatcher::new(vec![
            Arc::new(SlowChannel) as Arc<dyn NotificationChannel>
        ])
        .with_timeouts(TimeoutSettings {
            local_channel_ms: 10,
            ..Default::default()
        });
        let settings = NotificationSettings {
            desktop: true,
            audio: false,
            log_file: false,
            telegram: false,
        };

        let report = dispatcher
            .send(&[slot("a", AppointmentStatus::Available)], &settings)
            .await;

        assert_eq!(report.delivery_status, DeliveryStatus::Failed);
        assert!(report
            .per_channel_errors
            .get("desktop")
            .is_some_and(|e| e.contains("timed out")));
    }

    // ── filtering ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_non_available_slots_are_dropped() {
        let desktop = MockChannel::ok("desktop");
        let dispatcher = Dispatcher::new(vec![desktop.clone() as Arc<dyn NotificationChannel>]);
        let settings = NotificationSettings {
            desktop: true,
            audio: false,
            log_file: false,
            telegram: false,
        };

        let report = dispatcher
            .send(
                &[
                    slot("a", AppointmentStatus::Available),
                    slot("b", AppointmentStatus::Filled),
                ],
                &settings,
            )
            .await;

        // Only the available slot was delivered.
        assert_eq!(report.appointment_count, 1);
        assert_eq!(report.delivery_status, DeliveryStatus::Success);
    }

    #[tokio::test]
    async fn test_no_available_after_filter_fails_without_channel_calls() {
        let desktop = MockChannel::ok("desktop");
        let dispatcher = Dispatcher::new(vec![desktop.clone() as Arc<dyn NotificationChannel>]);

        let report = dispatcher
            .send(
                &[
                    slot("a", AppointmentStatus::Filled),
                    slot("b", AppointmentStatus::Unknown),
                ],
                &all_local(),
            )
            .await;

        assert_eq!(report.delivery_status, DeliveryStatus::Failed);
        assert_eq!(
            report.failure_reason.as_deref(),
            Some("no-available-after-filter")
        );
        assert_eq!(desktop.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_channels_enabled_fails() {
        let dispatcher = Dispatcher::new(vec![]);
        let settings = NotificationSettings {
            desktop: false,
            audio: false,
            log_file: false,
            telegram: false,
        };

        let report = dispatcher
            .send(&[slot("a", AppointmentStatus::Available)], &settings)
            .await;

        assert_eq!(report.delivery_status, DeliveryStatus::Failed);
        assert_eq!(report.failure_reason.as_deref(), Some("no-channels-enabled"));
    }

    #[tokio::test]
    async fn test_enabled_but_unconfigured_channel_counts_failed() {
        // Telegram enabled in settings but no telegram channel constructed.
        let dispatcher =
            Dispatcher::new(vec![MockChannel::ok("desktop") as Arc<dyn NotificationChannel>]);
        let settings = NotificationSettings {
            desktop: true,
            audio: false,
            log_file: false,
            telegram: true,
        };

        let report = dispatcher
            .send(&[slot("a", AppointmentStatus::Available)], &settings)
            .await;

        assert_eq!(report.delivery_status, DeliveryStatus::Partial);
        assert_eq!(
            report.per_channel_errors.get("telegram").map(String::as_str),
            Some("channel not configured")
        );
    }

    #[tokio::test]
    async fn test_disabled_channels_not_called() {
        let desktop = MockChannel::ok("desktop");
        let audio = MockChannel::ok("audio");
        let dispatcher = Dispatcher::new(vec![
            desktop.clone() as Arc<dyn NotificationChannel>,
            audio.clone(),
        ]);
        let settings = NotificationSettings {
            desktop: true,
            audio: false,
            log_file: false,
            telegram: false,
        };

        dispatcher
            .send(&[slot("a", AppointmentStatus::Available)], &settings)
            .await;

        assert_eq!(desktop.calls(), 1);
        assert_eq!(audio.calls(), 0);
    }
}

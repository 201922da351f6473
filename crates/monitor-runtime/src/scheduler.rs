//! The periodic monitoring loop.
//!
//! One tick: fetch → fold into the tracker → filter notifiable rising edges
//! → dispatch → mark notified → persist → sleep the remainder of the
//! interval. Fetches never overlap; when a tick overruns the interval the
//! next one fires immediately. Every step emits structured events to the
//! status log and the event bus.

use std::sync::Arc;
use std::time::{Duration, Instant};

use monitor_core::config::MonitorConfig;
use monitor_core::error::{ErrorContext, MonitorError, Result};
use monitor_core::events::{EventBus, MonitorEvent};
use monitor_core::models::{CheckResult, Session};
use monitor_data::history::{CheckHistory, CheckRecord};
use monitor_data::inspection::{InspectionRecord, InspectionStore};
use monitor_data::status_log::{LogLevel, StatusLog};
use monitor_data::store::DataPaths;
use monitor_notify::dispatcher::Dispatcher;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error_handler::{ErrorAction, ErrorHandler};
use crate::fetcher::{FetchError, FetchFilters, Fetcher};
use crate::tracker::Tracker;

/// Headroom the scheduler grants on top of the configured fetch timeout
/// before it gives up on a fetcher that failed to bound itself.
const FETCH_GRACE: Duration = Duration::from_secs(5);

/// Delay before the single parse-failure retry.
const PARSE_RETRY_DELAY: Duration = Duration::from_secs(2);

// ── Scheduler ─────────────────────────────────────────────────────────────────

/// Drives the monitoring loop; owns the tracker and every per-session
/// collaborator.
///
/// [`Scheduler::run`] consumes the scheduler and returns it when the loop
/// exits, so the controller can pause, reconfigure and resume without losing
/// tracker or notified-key state.
pub struct Scheduler {
    config: MonitorConfig,
    filters: FetchFilters,
    fetcher: Arc<dyn Fetcher>,
    dispatcher: Dispatcher,
    tracker: Tracker,
    clock: Arc<dyn Clock>,
    events: EventBus,
    status_log: StatusLog,
    history: CheckHistory,
    inspection: InspectionStore,
    error_handler: ErrorHandler,
    session: Session,
}

impl Scheduler {
    /// Assemble a scheduler for one session.
    ///
    /// Restores tracker and notified-key state from the data files under
    /// `paths`.
    pub fn new(
        config: MonitorConfig,
        paths: &DataPaths,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        session: Session,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::from_config(&config, paths.notifications_log())?;
        let tracker = Tracker::open(
            paths.tracking_file(),
            paths.notified_file(),
            config.max_tracking_days,
            clock.clone(),
        );
        let mut status_log = StatusLog::new(
            paths.monitor_log(),
            LogLevel::parse(&config.security.log_level),
        );
        status_log.set_session(&session.session_id);
        let history = CheckHistory::open(paths.history_file());
        let inspection = InspectionStore::open(paths.inspection_file());
        let error_handler = ErrorHandler::new(paths.errors_log());

        Ok(Self {
            filters: FetchFilters::from_config(&config),
            config,
            fetcher,
            dispatcher,
            tracker,
            clock,
            events,
            status_log,
            history,
            inspection,
            error_handler,
            session,
        })
    }

    /// Swap in a validated configuration without touching tracker state.
    ///
    /// Only fetch filters, the interval, channel selection and log gating
    /// change; notified keys and tracked slots are preserved.
    pub fn apply_config(&mut self, config: MonitorConfig, paths: &DataPaths) -> Result<()> {
        self.dispatcher = Dispatcher::from_config(&config, paths.notifications_log())?;
        self.filters = FetchFilters::from_config(&config);
        self.status_log = StatusLog::new(
            paths.monitor_log(),
            LogLevel::parse(&config.security.log_level),
        );
        self.status_log.set_session(&self.session.session_id);
        self.config = config;
        Ok(())
    }

    /// The session this scheduler is accumulating counters for.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Close the session and return the final record.
    pub fn end_session(&mut self) -> Session {
        self.session.end_time = Some(self.clock.now());
        self.session.clone()
    }

    /// End the session, log `session-ended`, flush state, and consume the
    /// scheduler. Called by the controller on graceful stop.
    pub fn finish(mut self) -> Session {
        let session = self.end_session();
        self.status_log.info(
            "session-ended",
            json!({
                "checks_performed": session.checks_performed,
                "notifications_sent": session.notifications_sent,
                "errors": session.errors.len(),
            }),
        );
        self.tracker.flush();
        self.status_log.flush();
        session
    }

    /// Read-only tracker statistics snapshot.
    pub fn tracker_statistics(&self) -> crate::tracker::TrackerStatistics {
        self.tracker.statistics()
    }

    // ── The loop ──────────────────────────────────────────────────────────

    /// Run ticks until `cancel` fires, then flush state and hand the
    /// scheduler back.
    pub async fn run(mut self, cancel: CancellationToken) -> Self {
        tracing::info!(
            session_id = %self.session.session_id,
            interval_ms = self.config.check_interval,
            "monitoring loop started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let tick_started = Instant::now();
            self.tick(&cancel).await;

            if cancel.is_cancelled() {
                break;
            }

            let interval = Duration::from_millis(self.config.check_interval);
            let remaining = interval.saturating_sub(tick_started.elapsed());
            if !remaining.is_zero() && !self.clock.sleep(remaining, &cancel).await {
                break;
            }
            // Overrun: remaining hit zero, the next tick fires immediately.
        }

        self.tracker.flush();
        self.status_log.flush();
        tracing::info!(session_id = %self.session.session_id, "monitoring loop stopped");
        self
    }

    // ── One tick ──────────────────────────────────────────────────────────

    async fn tick(&mut self, cancel: &CancellationToken) {
        let started = Instant::now();
        self.status_log.info(
            "check-started",
            json!({ "tick": self.session.checks_performed + 1 }),
        );

        let Some(result) = self.fetch_once_with_parse_retry(cancel).await else {
            return;
        };

        let delta = self.tracker.process(&result);
        if !delta.status_changed.is_empty() || !delta.removed.is_empty() {
            self.status_log.debug(
                "tracker-updated",
                json!({
                    "status_changed": delta.status_changed.len(),
                    "removed": delta.removed.len(),
                    "tracked": delta.all_tracked.len(),
                }),
            );
        }

        let candidates = self.tracker.notifiable(&delta.new_available);
        if !candidates.is_empty() {
            self.events.publish(MonitorEvent::NewAppointments {
                timestamp: self.clock.now(),
                appointments: candidates.clone(),
            });

            let report = self
                .dispatcher
                .send(&candidates, &self.config.notification_settings)
                .await;

            if report.delivered() {
                self.tracker.mark_notified(&candidates);
                self.session.notifications_sent += candidates.len() as u64;
                self.status_log.info(
                    "notification-sent",
                    json!({
                        "appointments": candidates.len(),
                        "status": report.delivery_status,
                        "errors": report.per_channel_errors,
                    }),
                );
                self.events.publish(MonitorEvent::NotificationSent {
                    timestamp: report.timestamp,
                    appointment_count: report.appointment_count,
                    channels: report.channels.iter().map(|c| c.channel.clone()).collect(),
                    delivery_status: format!("{:?}", report.delivery_status).to_lowercase(),
                });
            } else {
                // Nothing delivered: keys stay untouched so the next cycle
                // retries these slots.
                self.status_log.warn(
                    "notification-failed",
                    json!({
                        "appointments": candidates.len(),
                        "errors": report.per_channel_errors,
                        "reason": report.failure_reason,
                    }),
                );
                let error = MonitorError::Notification {
                    channel: "dispatcher".to_string(),
                    detail: report
                        .failure_reason
                        .unwrap_or_else(|| "all channels failed".to_string()),
                };
                self.route_error(error, "dispatch").await;
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        self.session.checks_performed += 1;
        self.history.record(CheckRecord {
            timestamp: result.timestamp,
            session_id: self.session.session_id.clone(),
            outcome: result.outcome,
            appointment_count: result.appointment_count,
            available_count: result.available_count,
            filled_count: result.filled_count,
            duration_ms,
        });
        self.status_log.info(
            "check-completed",
            json!({
                "outcome": result.outcome,
                "appointments": result.appointment_count,
                "available": result.available_count,
                "duration_ms": duration_ms,
            }),
        );
        self.events.publish(MonitorEvent::CheckCompleted {
            timestamp: self.clock.now(),
            outcome: result.outcome,
            appointment_count: result.appointment_count,
            available_count: result.available_count,
            duration_ms,
        });
    }

    // ── Fetching ──────────────────────────────────────────────────────────

    /// One fetch, with the single short-delay retry parse failures get.
    ///
    /// On any final failure the error is routed and `None` is returned: the
    /// tracker is not advanced and the loop continues at the next tick.
    async fn fetch_once_with_parse_retry(
        &mut self,
        cancel: &CancellationToken,
    ) -> Option<CheckResult> {
        match self.fetch_bounded(cancel).await? {
            Ok(result) => Some(result),
            Err(FetchError::Parse { .. }) => {
                tracing::debug!("parse failure; retrying once after a short delay");
                if !self.clock.sleep(PARSE_RETRY_DELAY, cancel).await {
                    return None;
                }
                match self.fetch_bounded(cancel).await? {
                    Ok(result) => Some(result),
                    Err(err) => {
                        if let FetchError::Parse {
                            ref url,
                            ref detail,
                            ref html,
                            ref selectors_tried,
                        } = err
                        {
                            self.inspection.record(InspectionRecord::new(
                                url.clone(),
                                html,
                                selectors_tried.clone(),
                                detail.clone(),
                            ));
                        }
                        self.route_error(err.into(), "fetch").await;
                        None
                    }
                }
            }
            Err(err) => {
                self.route_error(err.into(), "fetch").await;
                None
            }
        }
    }

    /// One fetch bounded by the configured fetch timeout (plus
    /// [`FETCH_GRACE`]) and the cancellation token.
    ///
    /// Outer `None` means cancelled; the inner result is the fetch outcome.
    async fn fetch_bounded(
        &mut self,
        cancel: &CancellationToken,
    ) -> Option<std::result::Result<CheckResult, FetchError>> {
        let deadline = self.config.timeouts.fetch() + FETCH_GRACE;
        tokio::select! {
            outcome = tokio::time::timeout(deadline, self.fetcher.fetch(&self.filters)) => {
                match outcome {
                    Ok(result) => Some(result),
                    Err(_) => Some(Err(FetchError::Network {
                        detail: format!("fetch exceeded the {}s deadline", deadline.as_secs()),
                    })),
                }
            }
            _ = cancel.cancelled() => None,
        }
    }

    // ── Error routing ─────────────────────────────────────────────────────

    async fn route_error(&mut self, error: MonitorError, operation: &str) {
        let ctx = ErrorContext::new(operation, "scheduler")
            .with_session(self.session.session_id.clone());
        let disposition = self.error_handler.handle(&error, &ctx);

        let summary = if self.config.security.mask_sensitive_data {
            monitor_core::masking::mask_text(&error.to_string())
        } else {
            error.to_string()
        };
        self.session.errors.push(summary.clone());
        self.status_log.error(
            "error",
            json!({
                "category": error.category().as_str(),
                "operation": operation,
                "detail": summary,
            }),
        );
        self.events.publish(MonitorEvent::Error {
            timestamp: self.clock.now(),
            category: error.category().as_str().to_string(),
            detail: summary.clone(),
        });

        if disposition.persistent {
            let delivered = self
                .dispatcher
                .send_alert(
                    "IELTS monitor: persistent failure",
                    &summary,
                    &self.config.notification_settings,
                )
                .await;
            self.status_log.error(
                "persistent-error",
                json!({ "detail": summary, "alert_delivered": delivered }),
            );
        }

        if disposition.action == ErrorAction::Stop {
            tracing::error!(error = %summary, "unrecoverable error in the scheduler");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

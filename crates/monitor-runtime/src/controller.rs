//! Lifecycle state machine for the monitor.
//!
//! The controller exposes start / stop / pause / resume / reconfigure over
//! the scheduler and guarantees that exactly one monitoring loop runs iff
//! the state is RUNNING. Graceful stop waits for the in-flight tick (bounded
//! at 30 s) before hard-cancelling; reconfigure swaps the live config
//! without losing tracker or notified-key state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use monitor_core::config::MonitorConfig;
use monitor_core::error::{MonitorError, Result};
use monitor_core::events::{EventBus, MonitorEvent};
use monitor_core::models::Session;
use monitor_data::store::DataPaths;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::Clock;
use crate::fetcher::Fetcher;
use crate::scheduler::Scheduler;

/// How long a graceful stop waits for the current tick before hard-cancel.
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(30);

// ── MonitorState ──────────────────────────────────────────────────────────────

/// Controller lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Stopped,
    Starting,
    Running,
    Paused,
    Stopping,
    Error,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<Scheduler>,
}

/// The single process-wide lifecycle coordinator.
pub struct Controller {
    state: MonitorState,
    config: MonitorConfig,
    paths: DataPaths,
    events: EventBus,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    running: Option<RunningLoop>,
    /// Scheduler parked across pause / reconfigure, tracker state intact.
    parked: Option<Scheduler>,
    last_session: Option<Session>,
}

impl Controller {
    /// Build a controller.
    ///
    /// The configuration is validated here; an invalid config refuses to
    /// construct (Configuration errors are fatal).
    pub fn new(
        config: MonitorConfig,
        paths: DataPaths,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Result<Self> {
        Self::validated(&config)?;
        paths.ensure()?;
        Ok(Self {
            state: MonitorState::Stopped,
            config,
            paths,
            events,
            fetcher,
            clock,
            running: None,
            parked: None,
            last_session: None,
        })
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// The most recently ended session, if any.
    pub fn last_session(&self) -> Option<&Session> {
        self.last_session.as_ref()
    }

    /// Bus carrying `{status-changed, check-completed, new-appointments,
    /// error, notification-sent}` events.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ── Transitions ───────────────────────────────────────────────────────

    /// STOPPED | ERROR → STARTING → RUNNING.
    ///
    /// A new session id is generated on every start; tracker and notified
    /// state are recovered from disk by the scheduler.
    pub async fn start(&mut self) -> Result<()> {
        if !matches!(self.state, MonitorState::Stopped | MonitorState::Error) {
            return Err(self.invalid("start"));
        }
        self.set_state(MonitorState::Starting);

        let session = Session::begin(
            Uuid::new_v4().to_string(),
            self.clock.now(),
            self.config.snapshot(),
        );
        let session_id = session.session_id.clone();

        let scheduler = match Scheduler::new(
            self.config.clone(),
            &self.paths,
            self.fetcher.clone(),
            self.clock.clone(),
            self.events.clone(),
            session,
        ) {
            Ok(scheduler) => scheduler,
            Err(e) => {
                self.set_state(MonitorState::Error);
                return Err(e);
            }
        };

        self.spawn(scheduler);
        self.set_state(MonitorState::Running);
        tracing::info!(session_id = %session_id, "monitor started");
        Ok(())
    }

    /// STARTING | RUNNING | PAUSED | ERROR → STOPPING → STOPPED.
    ///
    /// Waits for the current tick (bounded), flushes state, and records the
    /// ended session.
    pub async fn stop(&mut self) -> Result<()> {
        match self.state {
            MonitorState::Starting | MonitorState::Running => {
                self.set_state(MonitorState::Stopping);
                if let Some(scheduler) = self.halt_loop().await {
                    self.last_session = Some(scheduler.finish());
                }
                self.set_state(MonitorState::Stopped);
                Ok(())
            }
            MonitorState::Paused => {
                self.set_state(MonitorState::Stopping);
                if let Some(scheduler) = self.parked.take() {
                    self.last_session = Some(scheduler.finish());
                }
                self.set_state(MonitorState::Stopped);
                Ok(())
            }
            MonitorState::Error => {
                self.set_state(MonitorState::Stopped);
                Ok(())
            }
            _ => Err(self.invalid("stop")),
        }
    }

    /// RUNNING → PAUSED. The scheduler is parked with its state intact.
    pub async fn pause(&mut self) -> Result<()> {
        if self.state != MonitorState::Running {
            return Err(self.invalid("pause"));
        }
        self.parked = self.halt_loop().await;
        self.set_state(MonitorState::Paused);
        Ok(())
    }

    /// PAUSED → RUNNING. Resumes the parked scheduler in place.
    pub async fn resume(&mut self) -> Result<()> {
        if self.state != MonitorState::Paused {
            return Err(self.invalid("resume"));
        }
        let scheduler = match self.parked.take() {
            Some(scheduler) => scheduler,
            // The pause hard-cancelled and lost the task; recover from disk
            // within the same session semantics as a fresh start.
            None => Scheduler::new(
                self.config.clone(),
                &self.paths,
                self.fetcher.clone(),
                self.clock.clone(),
                self.events.clone(),
                Session::begin(
                    Uuid::new_v4().to_string(),
                    self.clock.now(),
                    self.config.snapshot(),
                ),
            )?,
        };
        self.spawn(scheduler);
        self.set_state(MonitorState::Running);
        Ok(())
    }

    /// RUNNING | PAUSED: validate and atomically swap the live config.
    ///
    /// Tracker state and notified keys are preserved; only filters, the
    /// interval, channel selection and log gating change for subsequent
    /// ticks.
    pub async fn reconfigure(&mut self, new_config: MonitorConfig) -> Result<()> {
        Self::validated(&new_config)?;

        match self.state {
            MonitorState::Running => {
                // pause → apply → resume.
                let mut scheduler = match self.halt_loop().await {
                    Some(scheduler) => scheduler,
                    None => {
                        self.set_state(MonitorState::Error);
                        return Err(MonitorError::Critical(
                            "scheduler lost during reconfigure".to_string(),
                        ));
                    }
                };
                self.set_state(MonitorState::Paused);
                if let Err(e) = scheduler.apply_config(new_config.clone(), &self.paths) {
                    // Keep the scheduler parked so its state is not lost.
                    self.parked = Some(scheduler);
                    return Err(e);
                }
                self.config = new_config;
                self.spawn(scheduler);
                self.set_state(MonitorState::Running);
                tracing::info!("configuration applied; monitoring resumed");
                Ok(())
            }
            MonitorState::Paused => {
                if let Some(scheduler) = self.parked.as_mut() {
                    scheduler.apply_config(new_config.clone(), &self.paths)?;
                }
                self.config = new_config;
                Ok(())
            }
            _ => Err(self.invalid("reconfigure")),
        }
    }

    // ── Private helpers ───────────────────────────────────────────────────

    fn validated(config: &MonitorConfig) -> Result<()> {
        config.validate().map_err(|errors| {
            let summary = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            MonitorError::Config { summary }
        })
    }

    fn spawn(&mut self, scheduler: Scheduler) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(cancel.clone()));
        self.running = Some(RunningLoop { cancel, handle });
    }

    /// Cancel the running loop and wait for the scheduler to come back.
    ///
    /// Waits [`GRACEFUL_STOP_TIMEOUT`] for the in-flight tick; past that the
    /// task is aborted and its in-memory state is given up (the tracker's
    /// last debounced persist survives on disk).
    async fn halt_loop(&mut self) -> Option<Scheduler> {
        let RunningLoop { cancel, mut handle } = self.running.take()?;
        cancel.cancel();

        match tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(scheduler)) => Some(scheduler),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "monitoring task panicked");
                None
            }
            Err(_) => {
                tracing::warn!("graceful stop timed out; hard-cancelling the monitoring task");
                handle.abort();
                None
            }
        }
    }

    fn set_state(&mut self, new: MonitorState) {
        if self.state == new {
            return;
        }
        let previous = self.state;
        self.state = new;
        tracing::debug!(from = previous.as_str(), to = new.as_str(), "state transition");
        self.events.publish(MonitorEvent::StatusChanged {
            timestamp: Utc::now(),
            previous: previous.as_str().to_string(),
            current: new.as_str().to_string(),
        });
    }

    fn invalid(&self, event: &str) -> MonitorError {
        MonitorError::InvalidTransition(format!(
            "'{event}' is not valid in state {}",
            self.state.as_str()
        ))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

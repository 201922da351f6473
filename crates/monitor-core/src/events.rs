//! Named monitor events and the publish-subscribe bus.
//!
//! Core components publish [`MonitorEvent`]s through an [`EventBus`]; the
//! controller registers subscribers (status log, CLI output) that consume
//! them without sharing any mutable state with the publishing side.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{Appointment, CheckOutcome};

// ── MonitorEvent ──────────────────────────────────────────────────────────────

/// The closed set of events the monitor publishes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum MonitorEvent {
    /// The controller's lifecycle state changed.
    StatusChanged {
        timestamp: DateTime<Utc>,
        previous: String,
        current: String,
    },
    /// One scheduler tick finished.
    CheckCompleted {
        timestamp: DateTime<Utc>,
        outcome: CheckOutcome,
        appointment_count: usize,
        available_count: usize,
        duration_ms: u64,
    },
    /// Fresh rising edges were detected this tick.
    NewAppointments {
        timestamp: DateTime<Utc>,
        appointments: Vec<Appointment>,
    },
    /// An error was recorded.
    Error {
        timestamp: DateTime<Utc>,
        category: String,
        detail: String,
    },
    /// A notification was delivered (fully or partially).
    NotificationSent {
        timestamp: DateTime<Utc>,
        appointment_count: usize,
        channels: Vec<String>,
        delivery_status: String,
    },
}

impl MonitorEvent {
    /// The event name as it appears in the status log.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status-changed",
            Self::CheckCompleted { .. } => "check-completed",
            Self::NewAppointments { .. } => "new-appointments",
            Self::Error { .. } => "error",
            Self::NotificationSent { .. } => "notification-sent",
        }
    }
}

// ── EventBus ──────────────────────────────────────────────────────────────────

/// Broadcast bus connecting publishers to any number of subscribers.
///
/// Built on `tokio::sync::broadcast`; slow subscribers lag (dropping their
/// oldest events) rather than stalling the monitoring loop.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    /// Create a bus with a bounded per-subscriber backlog.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: MonitorEvent) {
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => tracing::trace!(event = name, receivers, "event published"),
            Err(_) => tracing::trace!(event = name, "event published with no subscribers"),
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        // Enough backlog to ride out a slow subscriber for several ticks.
        Self::new(64)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

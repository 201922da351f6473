//! Slot lifecycle tracking and the notification oracle.
//!
//! [`Tracker::process`] folds each [`CheckResult`] into per-slot state,
//! detecting rising edges (any status → `available`), recording status
//! history, and removing slots that disappear. [`Tracker::notifiable`] is
//! the authoritative "should we notify this?" filter: a slot is notifiable
//! exactly once per rising edge, enforced through the persisted notified-key
//! set.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use monitor_core::models::{
    Appointment, AppointmentStatus, CheckResult, StatusChange, TrackedAppointment,
};
use serde::Serialize;

use crate::clock::Clock;

/// Minimum gap between debounced persists.
const PERSIST_DEBOUNCE: Duration = Duration::from_secs(2);

// ── TrackerDelta ──────────────────────────────────────────────────────────────

/// What one `process` call changed.
#[derive(Debug, Clone, Default)]
pub struct TrackerDelta {
    /// Slots that entered `available` this fetch (rising edges and fresh
    /// arrivals that are already available).
    pub new_available: Vec<Appointment>,
    /// Slots whose status changed (including the rising edges).
    pub status_changed: Vec<Appointment>,
    /// Slots absent from this fetch, now dropped from tracking.
    pub removed: Vec<Appointment>,
    /// Snapshot of everything tracked after the update.
    pub all_tracked: Vec<Appointment>,
}

// ── Statistics ────────────────────────────────────────────────────────────────

/// Read-only tracker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStatistics {
    pub tracked_count: usize,
    pub available_count: usize,
    pub notified_count: usize,
    pub total_notifications_sent: u64,
}

// ── Tracker ───────────────────────────────────────────────────────────────────

/// The in-memory + persisted slot state machine.
///
/// Owned solely by the scheduler's execution context; read-only views are
/// served as snapshots.
pub struct Tracker {
    tracked: HashMap<String, TrackedAppointment>,
    /// Ids notified since their most recent rising edge.
    notified_keys: HashSet<String>,
    clock: Arc<dyn Clock>,
    tracking_path: PathBuf,
    notified_path: PathBuf,
    max_tracking_days: i64,
    dirty: bool,
    last_persist: Option<Instant>,
}

impl Tracker {
    /// Open a tracker, restoring persisted state from the two state files.
    ///
    /// Entries older than `max_tracking_days` are swept immediately after
    /// load.
    pub fn open(
        tracking_path: PathBuf,
        notified_path: PathBuf,
        max_tracking_days: i64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tracked: HashMap<String, TrackedAppointment> = monitor_data::store::load(&tracking_path);
        let notified_keys: HashSet<String> = monitor_data::store::load(&notified_path);

        let mut tracker = Self {
            tracked,
            notified_keys,
            clock,
            tracking_path,
            notified_path,
            max_tracking_days,
            dirty: false,
            last_persist: None,
        };
        tracker.sweep_stale();
        tracker
    }

    // ── Public API ────────────────────────────────────────────────────────

    /// Fold one fetch result into tracking state.
    ///
    /// Infallible on bad input: malformed slots are dropped with a warning,
    /// duplicate ids are last-writer-wins with a warning. Side effects are
    /// confined to the internal maps and a debounced persist.
    pub fn process(&mut self, result: &CheckResult) -> TrackerDelta {
        let now = self.clock.now();
        self.sweep_stale();

        let mut delta = TrackerDelta::default();

        // Dedupe by id, last occurrence wins.
        let mut incoming: HashMap<String, &Appointment> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for slot in &result.appointments {
            if !slot.is_well_formed() {
                tracing::warn!(id = %slot.id, date = %slot.date, "parse-skip: malformed slot dropped");
                continue;
            }
            if incoming.insert(slot.id.clone(), slot).is_some() {
                tracing::warn!(id = %slot.id, "duplicate slot id in one fetch; last occurrence wins");
            } else {
                order.push(slot.id.clone());
            }
        }

        for id in &order {
            let slot = incoming[id];
            match self.tracked.get_mut(id) {
                None => {
                    let record = TrackedAppointment::first_seen(slot.clone(), now);
                    self.tracked.insert(id.clone(), record);
                    if slot.status == AppointmentStatus::Available {
                        delta.new_available.push(slot.clone());
                    }
                }
                Some(record) => {
                    record.last_seen = now;
                    let previous = record.appointment.status;
                    if previous != slot.status {
                        record.status_history.push(StatusChange {
                            timestamp: now,
                            previous,
                            new: slot.status,
                            reason: "status-changed".to_string(),
                        });
                        record.appointment = slot.clone();

                        if previous != AppointmentStatus::Available
                            && slot.status == AppointmentStatus::Available
                        {
                            delta.new_available.push(slot.clone());
                        }
                        if previous == AppointmentStatus::Available
                            && slot.status != AppointmentStatus::Available
                        {
                            // Leaving `available` re-arms notification for
                            // the next rising edge.
                            self.notified_keys.remove(id);
                        }
                        delta.status_changed.push(slot.clone());
                    } else {
                        // Same status: refresh non-status fields silently.
                        record.appointment = slot.clone();
                    }
                }
            }
        }

        // Absence from a fetch is removal; a later reappearance is a fresh
        // rising edge.
        let absent: Vec<String> = self
            .tracked
            .keys()
            .filter(|id| !incoming.contains_key(*id))
            .cloned()
            .collect();
        for id in absent {
            if let Some(record) = self.tracked.remove(&id) {
                self.notified_keys.remove(&id);
                delta.removed.push(record.appointment);
            }
        }

        delta.all_tracked = self
            .tracked
            .values()
            .map(|record| record.appointment.clone())
            .collect();

        self.dirty = true;
        self.persist_debounced();
        delta
    }

    /// Keep only slots that are `available` and not yet notified since their
    /// last rising edge.
    pub fn notifiable(&self, slots: &[Appointment]) -> Vec<Appointment> {
        slots
            .iter()
            .filter(|slot| slot.status == AppointmentStatus::Available)
            .filter(|slot| !self.notified_keys.contains(&slot.id))
            .cloned()
            .collect()
    }

    /// Record an acknowledged delivery for each slot.
    ///
    /// Must only be called after the dispatcher reported success or partial
    /// success.
    pub fn mark_notified(&mut self, slots: &[Appointment]) {
        for slot in slots {
            self.notified_keys.insert(slot.id.clone());
            if let Some(record) = self.tracked.get_mut(&slot.id) {
                record.notifications_sent += 1;
            }
        }
        if !slots.is_empty() {
            self.dirty = true;
            self.persist_debounced();
        }
    }

    /// Status history snapshot for one slot.
    pub fn history(&self, id: &str) -> Option<Vec<StatusChange>> {
        self.tracked.get(id).map(|record| record.status_history.clone())
    }

    /// Status changes observed within `window` before now, newest first.
    pub fn recent_changes(&self, window: chrono::Duration) -> Vec<(String, StatusChange)> {
        let cutoff = self.clock.now() - window;
        let mut changes: Vec<(String, StatusChange)> = self
            .tracked
            .iter()
            .flat_map(|(id, record)| {
                record
                    .status_history
                    .iter()
                    .filter(|change| change.timestamp >= cutoff)
                    .map(|change| (id.clone(), change.clone()))
            })
            .collect();
        changes.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp));
        changes
    }

    /// Current counters.
    pub fn statistics(&self) -> TrackerStatistics {
        TrackerStatistics {
            tracked_count: self.tracked.len(),
            available_count: self
                .tracked
                .values()
                .filter(|record| record.status() == AppointmentStatus::Available)
                .count(),
            notified_count: self.notified_keys.len(),
            total_notifications_sent: self
                .tracked
                .values()
                .map(|record| u64::from(record.notifications_sent))
                .sum(),
        }
    }

    /// Snapshot of every tracked record (for `status` / inspection output).
    pub fn snapshot(&self) -> Vec<TrackedAppointment> {
        let mut records: Vec<TrackedAppointment> = self.tracked.values().cloned().collect();
        records.sort_by(|a, b| a.appointment.id.cmp(&b.appointment.id));
        records
    }

    /// Synchronously persist any pending state. Called on shutdown.
    pub fn flush(&mut self) {
        if self.dirty {
            self.persist_now();
        }
    }

    /// Drop all tracked slots and notified keys, persisting immediately.
    pub fn clear(&mut self) {
        self.tracked.clear();
        self.notified_keys.clear();
        self.dirty = true;
        self.persist_now();
    }

    // ── Private helpers ───────────────────────────────────────────────────

    /// Remove entries whose `last_seen` is older than the tracking window.
    fn sweep_stale(&mut self) {
        let cutoff = self.clock.now() - chrono::Duration::days(self.max_tracking_days);
        let stale: Vec<String> = self
            .tracked
            .iter()
            .filter(|(_, record)| record.last_seen < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            tracing::debug!(id = %id, "sweeping stale tracked slot");
            self.tracked.remove(&id);
            self.notified_keys.remove(&id);
            self.dirty = true;
        }
    }

    /// Persist at most once per debounce window; writes are amortised across
    /// bursts of updates.
    fn persist_debounced(&mut self) {
        let due = match self.last_persist {
            None => true,
            Some(at) => at.elapsed() >= PERSIST_DEBOUNCE,
        };
        if due {
            self.persist_now();
        }
    }

    fn persist_now(&mut self) {
        if let Err(e) = monitor_data::store::save(&self.tracking_path, &self.tracked) {
            tracing::warn!(error = %e, "failed to persist tracking state");
            return;
        }
        if let Err(e) = monitor_data::store::save(&self.notified_path, &self.notified_keys) {
            tracing::warn!(error = %e, "failed to persist notified keys");
            return;
        }
        self.dirty = false;
        self.last_persist = Some(Instant::now());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

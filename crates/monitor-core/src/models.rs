//! Core domain types for the IELTS appointment monitor.
//!
//! Everything the tracker persists and the dispatcher reports is defined
//! here: appointment slots, their closed status enumeration, per-slot
//! tracking records, fetch results, and session bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── AppointmentStatus ─────────────────────────────────────────────────────────

/// Registration state of a single exam slot.
///
/// This enumeration is closed: any status string the fetcher cannot map onto
/// one of the first four variants becomes [`AppointmentStatus::Unknown`],
/// which is never notifiable and never counts as a status edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    /// The slot can be booked right now.
    Available,
    /// The slot exists but every seat is taken.
    Filled,
    /// The slot is announced but registration has not opened.
    Pending,
    /// The slot is shown but registration is closed for other reasons.
    NotRegisterable,
    /// The fetcher could not classify the slot.
    Unknown,
}

impl AppointmentStatus {
    /// Map an arbitrary status string onto the closed enumeration.
    ///
    /// Matching is case-insensitive and tolerates the common wire spellings
    /// (`"not-registerable"`, `"not_registerable"`). Anything else becomes
    /// [`AppointmentStatus::Unknown`].
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "available" => Self::Available,
            "filled" | "full" => Self::Filled,
            "pending" => Self::Pending,
            "not-registerable" | "not_registerable" | "notregisterable" => Self::NotRegisterable,
            _ => Self::Unknown,
        }
    }

    /// Canonical wire spelling, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Filled => "filled",
            Self::Pending => "pending",
            Self::NotRegisterable => "not-registerable",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Appointment ───────────────────────────────────────────────────────────────

/// One bookable exam sitting scraped from the upstream timetable.
///
/// Identity is the `id` field alone; two appointments are equal iff their ids
/// are equal. `status` is the only field the tracker treats as mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    /// Stable identifier derived from date, time, city, exam type and location.
    pub id: String,
    /// Exam date as ISO `YYYY-MM-DD`.
    pub date: String,
    /// Time range as `HH:MM-HH:MM`.
    pub time: String,
    /// City the exam is held in.
    pub city: String,
    /// Exam model, e.g. `"IELTS"`, `"CDIELTS"`, `"UKVI"`.
    pub exam_type: String,
    /// Venue name.
    pub location: String,
    /// Current registration state.
    pub status: AppointmentStatus,
    /// Listed price in minor currency units, when shown on the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<u64>,
    /// Direct registration link, when the page exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_url: Option<String>,
}

impl Appointment {
    /// Derive the stable slot id from its identifying fields.
    ///
    /// Fields are lowercased, inner whitespace is collapsed to single dashes,
    /// and the parts are joined with `|` so the id survives cosmetic changes
    /// in the scraped text.
    pub fn derive_id(
        date: &str,
        time: &str,
        city: &str,
        exam_type: &str,
        location: &str,
    ) -> String {
        fn slug(part: &str) -> String {
            part.trim()
                .to_lowercase()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join("-")
        }
        format!(
            "{}|{}|{}|{}|{}",
            slug(date),
            slug(time),
            slug(city),
            slug(exam_type),
            slug(location)
        )
    }

    /// `true` when the slot carries the minimum identifying fields.
    ///
    /// Malformed slots are dropped at the tracker boundary with a
    /// `parse-skip` warning and never enter tracking state.
    pub fn is_well_formed(&self) -> bool {
        !self.id.trim().is_empty() && !self.date.trim().is_empty() && !self.time.trim().is_empty()
    }
}

impl PartialEq for Appointment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Appointment {}

// ── StatusChange ──────────────────────────────────────────────────────────────

/// One recorded status transition of a tracked slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    /// When the transition was observed.
    pub timestamp: DateTime<Utc>,
    /// Status before the transition.
    pub previous: AppointmentStatus,
    /// Status after the transition.
    pub new: AppointmentStatus,
    /// Why the entry exists, e.g. `"first-seen"` or `"status-changed"`.
    pub reason: String,
}

// ── TrackedAppointment ────────────────────────────────────────────────────────

/// Per-slot tracking record maintained by the tracker.
///
/// Invariants:
/// - `status_history` is non-empty and chronologically ordered.
/// - The last history entry's `new` status equals `appointment.status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedAppointment {
    /// Latest observed snapshot of the slot.
    pub appointment: Appointment,
    /// First time this id appeared in a fetch.
    pub first_seen: DateTime<Utc>,
    /// Most recent fetch that contained this id.
    pub last_seen: DateTime<Utc>,
    /// Ordered transition log, starting with the `first-seen` entry.
    pub status_history: Vec<StatusChange>,
    /// How many notifications have been delivered for this slot.
    #[serde(default)]
    pub notifications_sent: u32,
}

impl TrackedAppointment {
    /// Build a fresh record for a slot seen for the first time at `now`.
    pub fn first_seen(appointment: Appointment, now: DateTime<Utc>) -> Self {
        let initial = StatusChange {
            timestamp: now,
            previous: AppointmentStatus::Unknown,
            new: appointment.status,
            reason: "first-seen".to_string(),
        };
        Self {
            appointment,
            first_seen: now,
            last_seen: now,
            status_history: vec![initial],
            notifications_sent: 0,
        }
    }

    /// Current status, straight from the latest snapshot.
    pub fn status(&self) -> AppointmentStatus {
        self.appointment.status
    }
}

// ── CheckResult ───────────────────────────────────────────────────────────────

/// Overall classification of a single fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckOutcome {
    /// At least one slot is available.
    Available,
    /// Slots exist but none are available.
    Filled,
    /// The page listed no slots at all.
    NoSlots,
}

/// The classified result of one timetable fetch.
///
/// Use [`CheckResult::from_appointments`] so the count/outcome invariants
/// hold by construction: `appointment_count == appointments.len()`,
/// `available_count + filled_count <= appointment_count` (the remainder are
/// pending / not-registerable / unknown), and the outcome is `Available` iff
/// any slot is available, `NoSlots` iff the page was empty, `Filled`
/// otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Derived outcome classification.
    pub outcome: CheckOutcome,
    /// Every slot the fetcher classified, in page order.
    pub appointments: Vec<Appointment>,
    /// Total number of slots.
    pub appointment_count: usize,
    /// Slots with status `available`.
    pub available_count: usize,
    /// Slots with status `filled`.
    pub filled_count: usize,
    /// When the fetch completed.
    pub timestamp: DateTime<Utc>,
    /// The URL that was fetched.
    pub url: String,
}

impl CheckResult {
    /// Classify a set of appointments into a result.
    pub fn from_appointments(
        appointments: Vec<Appointment>,
        url: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let appointment_count = appointments.len();
        let available_count = appointments
            .iter()
            .filter(|a| a.status == AppointmentStatus::Available)
            .count();
        let filled_count = appointments
            .iter()
            .filter(|a| a.status == AppointmentStatus::Filled)
            .count();

        let outcome = if available_count > 0 {
            CheckOutcome::Available
        } else if appointment_count == 0 {
            CheckOutcome::NoSlots
        } else {
            CheckOutcome::Filled
        };

        Self {
            outcome,
            appointments,
            appointment_count,
            available_count,
            filled_count,
            timestamp,
            url: url.into(),
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Bookkeeping for one contiguous RUNNING period of the controller.
///
/// A new `session_id` is generated on every start; counters accumulate until
/// the session ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique id for this run.
    pub session_id: String,
    /// When the controller entered RUNNING.
    pub start_time: DateTime<Utc>,
    /// When the session ended, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Completed scheduler ticks.
    #[serde(default)]
    pub checks_performed: u64,
    /// Notifications successfully delivered.
    #[serde(default)]
    pub notifications_sent: u64,
    /// Error summaries recorded during the session.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Snapshot of the configuration the session started with.
    pub configuration: serde_json::Value,
}

impl Session {
    /// Start a new session at `now` with the given config snapshot.
    pub fn begin(session_id: String, now: DateTime<Utc>, configuration: serde_json::Value) -> Self {
        Self {
            session_id,
            start_time: now,
            end_time: None,
            checks_performed: 0,
            notifications_sent: 0,
            errors: Vec::new(),
            configuration,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

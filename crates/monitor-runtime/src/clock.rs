//! Time source for the monitoring loop.
//!
//! The scheduler never calls `Utc::now()` or `tokio::time::sleep` directly;
//! it goes through [`Clock`] so tests can script time. Sleeps are cancellable
//! through the controller's [`CancellationToken`] and observe cancellation
//! promptly.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

// ── Clock ─────────────────────────────────────────────────────────────────────

/// Wall-clock time plus cancellable delays.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for `duration` or until `cancel` fires.
    ///
    /// Returns `true` when the full duration elapsed, `false` on
    /// cancellation.
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool;
}

// ── SystemClock ───────────────────────────────────────────────────────────────

/// The production clock: real time, real sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

// ── ManualClock ───────────────────────────────────────────────────────────────

/// Deterministic clock for tests: time only moves when advanced, sleeps
/// return immediately.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    /// Move time forward.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += duration;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }

    async fn sleep(&self, _duration: Duration, cancel: &CancellationToken) -> bool {
        !cancel.is_cancelled()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Inspection data captured on parse failures.
//!
//! When the fetcher loads a page but cannot find the expected structure, the
//! scheduler records what was tried so the selector cascade can be debugged
//! offline: a bounded HTML excerpt, the selector families attempted, and
//! their confidence scores.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store;

/// Cap on retained records.
pub const MAX_INSPECTION_RECORDS: usize = 20;

/// Cap on the stored HTML excerpt, in bytes.
pub const MAX_HTML_EXCERPT_BYTES: usize = 16 * 1024;

// ── SelectorAttempt ───────────────────────────────────────────────────────────

/// One selector family tried against the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorAttempt {
    /// The CSS selector that was applied.
    pub selector: String,
    /// How many elements it matched.
    pub matches: usize,
    /// Classification confidence in `0.0..=1.0`.
    pub confidence: f64,
}

// ── InspectionRecord ──────────────────────────────────────────────────────────

/// Everything captured about one failed parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionRecord {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    /// Truncated page source for offline inspection.
    pub html_excerpt: String,
    pub selectors_tried: Vec<SelectorAttempt>,
    /// Human-readable description of why classification failed.
    pub failure: String,
}

impl InspectionRecord {
    /// Build a record, truncating the HTML excerpt at a char boundary.
    pub fn new(
        url: impl Into<String>,
        html: &str,
        selectors_tried: Vec<SelectorAttempt>,
        failure: impl Into<String>,
    ) -> Self {
        let mut cut = MAX_HTML_EXCERPT_BYTES.min(html.len());
        while cut > 0 && !html.is_char_boundary(cut) {
            cut -= 1;
        }
        Self {
            timestamp: Utc::now(),
            url: url.into(),
            html_excerpt: html[..cut].to_string(),
            selectors_tried,
            failure: failure.into(),
        }
    }
}

// ── InspectionStore ───────────────────────────────────────────────────────────

/// Bounded, persisted collection of inspection records.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InspectionStore {
    records: Vec<InspectionRecord>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl InspectionStore {
    pub fn open(path: PathBuf) -> Self {
        let mut inspection: Self = store::load(&path);
        inspection.path = Some(path);
        inspection
    }

    /// Append a record, trimming the oldest beyond the cap, and persist.
    pub fn record(&mut self, record: InspectionRecord) {
        self.records.push(record);
        if self.records.len() > MAX_INSPECTION_RECORDS {
            let excess = self.records.len() - MAX_INSPECTION_RECORDS;
            self.records.drain(..excess);
        }
        if let Some(path) = &self.path {
            if let Err(e) = store::save(path, self) {
                tracing::warn!(error = %e, "failed to persist inspection data");
            }
        }
    }

    pub fn records(&self) -> &[InspectionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

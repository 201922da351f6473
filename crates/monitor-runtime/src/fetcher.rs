//! The fetcher contract.
//!
//! A [`Fetcher`] turns the configured filters into one classified
//! [`CheckResult`]. The contract is strict: no partial results (an error
//! yields no result at all), no shared-state mutation, and a single call is
//! time-bounded by the implementation. The production implementation is
//! [`crate::http_fetcher::HttpFetcher`]; tests script their own.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use monitor_core::config::MonitorConfig;
use monitor_core::error::MonitorError;
use monitor_core::models::CheckResult;
use monitor_data::inspection::SelectorAttempt;
use thiserror::Error;

// ── FetchFilters ──────────────────────────────────────────────────────────────

/// What to ask the upstream timetable for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchFilters {
    pub cities: BTreeSet<String>,
    pub exam_models: BTreeSet<String>,
    /// Months 1-12; empty means all months.
    pub months: BTreeSet<u8>,
}

impl FetchFilters {
    /// Extract the fetch-relevant subset of the configuration.
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            cities: config.cities.clone(),
            exam_models: config.exam_models.clone(),
            months: config.months.clone(),
        }
    }
}

// ── FetchError ────────────────────────────────────────────────────────────────

/// Why a fetch produced no result.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport, DNS or timeout failure before a page was obtained.
    #[error("network failure: {detail}")]
    Network { detail: String },

    /// The page loaded but the expected structure was absent.
    #[error("parse failure for {url}: {detail}")]
    Parse {
        url: String,
        detail: String,
        /// Page source captured for inspection.
        html: String,
        /// The selector cascade that was tried, with confidence scores.
        selectors_tried: Vec<SelectorAttempt>,
    },

    /// Upstream signalled throttling.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
}

impl From<FetchError> for MonitorError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Network { detail } => MonitorError::Network {
                operation: "fetch".to_string(),
                detail,
            },
            FetchError::Parse { url, detail, .. } => MonitorError::Parse { url, detail },
            FetchError::RateLimited { retry_after } => MonitorError::RateLimited { retry_after },
        }
    }
}

// ── Fetcher ───────────────────────────────────────────────────────────────────

/// Pluggable timetable fetcher.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch and classify the timetable for `filters`.
    ///
    /// Implementations may retry transient failures internally but must
    /// bound one call (30 s by default) and must not mutate shared state.
    async fn fetch(&self, filters: &FetchFilters) -> Result<CheckResult, FetchError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Production fetcher: HTTP GET plus a prioritized selector cascade.
//!
//! Fetches the rendered timetable page and applies selector families in
//! priority order; the first family that yields well-formed slots wins. Every
//! family records a [`SelectorAttempt`] with a confidence score so parse
//! failures can be inspected offline. Slots with ambiguous status indicators
//! are classified `unknown` and therefore never notified.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use monitor_core::models::{Appointment, AppointmentStatus, CheckResult};
use monitor_data::inspection::SelectorAttempt;
use scraper::{ElementRef, Html, Selector};

use crate::fetcher::{FetchError, FetchFilters, Fetcher};

/// Slots classified below this confidence keep `unknown` status.
const MIN_SLOT_CONFIDENCE: f64 = 0.6;

// ── Selector families ─────────────────────────────────────────────────────────

/// One family of selectors describing a page layout variant.
struct SelectorFamily {
    /// Repeated element, one per slot.
    items: &'static str,
    date: &'static str,
    time: &'static str,
    city: &'static str,
    exam_type: &'static str,
    location: &'static str,
}

/// Layout variants observed on the timetable, most specific first.
const FAMILIES: [SelectorFamily; 3] = [
    SelectorFamily {
        items: "a.exam__item",
        date: "time.exam__date",
        time: "span.exam__hours",
        city: "span.exam__city",
        exam_type: "span.exam__model",
        location: "span.exam__location",
    },
    SelectorFamily {
        items: "table.timetable tbody tr",
        date: "td.date",
        time: "td.time",
        city: "td.city",
        exam_type: "td.exam-type",
        location: "td.location",
    },
    SelectorFamily {
        items: "div.exam-card",
        date: ".exam-date",
        time: ".exam-time",
        city: ".exam-city",
        exam_type: ".exam-model",
        location: ".exam-venue",
    },
];

// ── HttpFetcher ───────────────────────────────────────────────────────────────

/// Fetcher backed by `reqwest` and the selector cascade.
pub struct HttpFetcher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    /// Build a fetcher for `base_url`, bounding one call at `timeout`
    /// (`config.timeouts.fetch()`, 30 s by default).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network {
                detail: format!("client construction failed: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Build the timetable URL with the filter query string.
    fn build_url(&self, filters: &FetchFilters) -> String {
        let mut params: Vec<String> = Vec::new();
        for city in &filters.cities {
            params.push(format!("city%5B%5D={city}"));
        }
        for model in &filters.exam_models {
            params.push(format!("model%5B%5D={model}"));
        }
        for month in &filters.months {
            params.push(format!("month%5B%5D={month}"));
        }
        if params.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}?{}", self.base_url, params.join("&"))
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, filters: &FetchFilters) -> Result<CheckResult, FetchError> {
        let url = self.build_url(filters);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                detail: format!("GET {url} failed: {e}"),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FetchError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(FetchError::Network {
                detail: format!("GET {url} returned {status}"),
            });
        }

        let html = response.text().await.map_err(|e| FetchError::Network {
            detail: format!("reading body of {url} failed: {e}"),
        })?;

        let appointments = parse_timetable(&html, &url)?;
        let appointments = apply_month_filter(appointments, filters);

        tracing::debug!(
            url = %url,
            count = appointments.len(),
            "timetable fetched and classified"
        );
        Ok(CheckResult::from_appointments(appointments, url, Utc::now()))
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

fn selector(raw: &'static str) -> Selector {
    Selector::parse(raw).expect("static selector is valid")
}

/// Apply the selector cascade to a rendered page.
///
/// Returns the classified slots of the first family that produces at least
/// one well-formed slot, or a [`FetchError::Parse`] carrying every attempt.
pub(crate) fn parse_timetable(html: &str, url: &str) -> Result<Vec<Appointment>, FetchError> {
    let document = Html::parse_document(html);
    let mut attempts: Vec<SelectorAttempt> = Vec::new();

    for family in &FAMILIES {
        let items: Vec<ElementRef<'_>> = document.select(&selector(family.items)).collect();
        if items.is_empty() {
            attempts.push(SelectorAttempt {
                selector: family.items.to_string(),
                matches: 0,
                confidence: 0.0,
            });
            continue;
        }

        let parsed: Vec<Appointment> = items
            .iter()
            .filter_map(|item| parse_slot(item, family))
            .collect();
        let confidence = parsed.len() as f64 / items.len() as f64;
        attempts.push(SelectorAttempt {
            selector: family.items.to_string(),
            matches: items.len(),
            confidence,
        });

        if !parsed.is_empty() {
            return Ok(parsed);
        }
    }

    // A page that renders the empty-timetable marker genuinely has no slots.
    if document.select(&selector(".no-exams, .empty-timetable")).next().is_some() {
        return Ok(Vec::new());
    }

    Err(FetchError::Parse {
        url: url.to_string(),
        detail: "no selector family matched the page".to_string(),
        html: html.to_string(),
        selectors_tried: attempts,
    })
}

/// Parse one slot element; `None` when the identifying fields are missing.
fn parse_slot(item: &ElementRef<'_>, family: &SelectorFamily) -> Option<Appointment> {
    let date = field_text(item, family.date)?;
    let time = field_text(item, family.time)?;
    let city = field_text(item, family.city).unwrap_or_default();
    let exam_type = field_text(item, family.exam_type).unwrap_or_default();
    let location = field_text(item, family.location).unwrap_or_default();

    let mut status = classify_status(item);

    // Confidence: how many of the descriptive fields were actually present.
    let found = [
        true, // date (required above)
        true, // time
        !city.is_empty(),
        !exam_type.is_empty(),
        !location.is_empty(),
    ]
    .iter()
    .filter(|f| **f)
    .count();
    let confidence = found as f64 / 5.0;
    if confidence < MIN_SLOT_CONFIDENCE {
        status = AppointmentStatus::Unknown;
    }

    let id = Appointment::derive_id(&date, &time, &city, &exam_type, &location);
    Some(Appointment {
        id,
        date,
        time,
        city,
        exam_type,
        location,
        status,
        price: parse_price(item),
        registration_url: registration_link(item),
    })
}

/// Classify a slot's status from its classes and text.
///
/// The upstream page marks filled slots with a `disabled` class and the
/// Persian "capacity filled" label; registerable slots carry the register
/// call-to-action.
fn classify_status(item: &ElementRef<'_>) -> AppointmentStatus {
    let classes = item.value().attr("class").unwrap_or_default().to_lowercase();
    let text = item.text().collect::<String>().to_lowercase();

    if classes.contains("disabled") || classes.contains("disable") {
        return AppointmentStatus::Filled;
    }
    if text.contains("تکمیل ظرفیت") || text.contains("تکمیل") || text.contains("full") {
        return AppointmentStatus::Filled;
    }
    if text.contains("در انتظار") || text.contains("pending") {
        return AppointmentStatus::Pending;
    }
    if text.contains("غیر قابل ثبت نام") || text.contains("not registerable") {
        return AppointmentStatus::NotRegisterable;
    }
    if classes.contains("available") || text.contains("ثبت نام") || text.contains("register") {
        return AppointmentStatus::Available;
    }

    AppointmentStatus::Unknown
}

fn field_text(item: &ElementRef<'_>, sel: &'static str) -> Option<String> {
    let parsed = Selector::parse(sel).ok()?;
    let text = item
        .select(&parsed)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn parse_price(item: &ElementRef<'_>) -> Option<u64> {
    let parsed = Selector::parse(".price, .exam__price, td.price").ok()?;
    let text = item.select(&parsed).next()?.text().collect::<String>();
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn registration_link(item: &ElementRef<'_>) -> Option<String> {
    if let Some(href) = item.value().attr("href") {
        return Some(href.to_string());
    }
    let parsed = Selector::parse("a[href]").ok()?;
    item.select(&parsed)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(|href| href.to_string())
}

/// Keep only slots in the configured months (empty filter keeps all).
fn apply_month_filter(appointments: Vec<Appointment>, filters: &FetchFilters) -> Vec<Appointment> {
    if filters.months.is_empty() {
        return appointments;
    }
    appointments
        .into_iter()
        .filter(|slot| match slot_month(&slot.date) {
            Some(month) => filters.months.contains(&month),
            // Unparseable dates are kept; the tracker sees them as-is.
            None => true,
        })
        .collect()
}

fn slot_month(date: &str) -> Option<u8> {
    date.split('-').nth(1)?.parse().ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Channel-specific rendering of appointment notifications.
//!
//! Desktop wants a short title and plain-text body, Telegram wants HTML with
//! optional per-slot detail, and the notification log wants one JSON line.
//! All renderers take the same slice of available slots.

use chrono::{DateTime, Utc};
use monitor_core::config::TelegramMessageFormat;
use monitor_core::models::Appointment;

// ── Desktop ───────────────────────────────────────────────────────────────────

/// Short title for a host desktop notification.
pub fn desktop_title(slots: &[Appointment]) -> String {
    match slots.len() {
        1 => "IELTS slot available!".to_string(),
        n => format!("{n} IELTS slots available!"),
    }
}

/// Plain-text body for a host desktop notification.
///
/// Keeps at most three slots so the toast stays readable; the rest are
/// summarised.
pub fn desktop_body(slots: &[Appointment]) -> String {
    let mut lines: Vec<String> = slots
        .iter()
        .take(3)
        .map(|slot| format!("{} {} — {} ({})", slot.date, slot.time, slot.city, slot.exam_type))
        .collect();
    if slots.len() > 3 {
        lines.push(format!("…and {} more", slots.len() - 3));
    }
    lines.join("\n")
}

// ── Telegram ──────────────────────────────────────────────────────────────────

/// Escape the three characters HTML parse mode reserves.
fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Render the Telegram message in the configured format.
///
/// HTML parse mode; the caller controls link preview separately.
pub fn telegram_text(slots: &[Appointment], format: TelegramMessageFormat) -> String {
    match format {
        TelegramMessageFormat::Simple => telegram_simple(slots),
        TelegramMessageFormat::Detailed => telegram_detailed(slots),
    }
}

fn telegram_simple(slots: &[Appointment]) -> String {
    let mut text = format!("<b>{}</b>\n", html_escape(&desktop_title(slots)));
    for slot in slots {
        text.push_str(&format!(
            "• {} {} — {}\n",
            html_escape(&slot.date),
            html_escape(&slot.time),
            html_escape(&slot.city)
        ));
    }
    text.trim_end().to_string()
}

fn telegram_detailed(slots: &[Appointment]) -> String {
    let mut text = format!("<b>{}</b>\n\n", html_escape(&desktop_title(slots)));
    for slot in slots {
        text.push_str(&format!(
            "📅 <b>{}</b> {}\n📍 {}, {}\n🎓 {}\n",
            html_escape(&slot.date),
            html_escape(&slot.time),
            html_escape(&slot.city),
            html_escape(&slot.location),
            html_escape(&slot.exam_type),
        ));
        if let Some(price) = slot.price {
            text.push_str(&format!("💰 {price}\n"));
        }
        if let Some(url) = &slot.registration_url {
            text.push_str(&format!("<a href=\"{}\">Register</a>\n", html_escape(url)));
        }
        text.push('\n');
    }
    text.trim_end().to_string()
}

// ── Notification log ──────────────────────────────────────────────────────────

/// One structured line for `notifications.log`.
pub fn log_line(slots: &[Appointment], timestamp: DateTime<Utc>) -> serde_json::Value {
    serde_json::json!({
        "timestamp": timestamp,
        "type": "new-available",
        "appointment_count": slots.len(),
        "appointments": slots.iter().map(|slot| serde_json::json!({
            "id": slot.id,
            "date": slot.date,
            "time": slot.time,
            "city": slot.city,
            "exam_type": slot.exam_type,
            "location": slot.location,
        })).collect::<Vec<_>>(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_core::models::AppointmentStatus;

    fn slot(id: &str) -> Appointment {
        Appointment {
            id: id.to_string(),
            date: "2025-10-04".to_string(),
            time: "09:00-12:00".to_string(),
            city: "Isfahan".to_string(),
            exam_type: "CDIELTS".to_string(),
            location: "Safir Office".to_string(),
            status: AppointmentStatus::Available,
            price: Some(91_000_00),
            registration_url: Some("https://example.test/register/1".to_string()),
        }
    }

    // ── desktop ───────────────────────────────────────────────────────────

    #[test]
    fn test_desktop_title_singular_plural() {
        assert_eq!(desktop_title(&[slot("a")]), "IELTS slot available!");
        assert_eq!(
            desktop_title(&[slot("a"), slot("b")]),
            "2 IELTS slots available!"
        );
    }

    #[test]
    fn test_desktop_body_caps_at_three_slots() {
        let slots: Vec<_> = (0..5).map(|i| slot(&format!("s{i}"))).collect();
        let body = desktop_body(&slots);
        assert_eq!(body.lines().count(), 4);
        assert!(body.ends_with("…and 2 more"));
    }

    // ── telegram ──────────────────────────────────────────────────────────

    #[test]
    fn test_telegram_simple_lists_each_slot() {
        let text = telegram_text(&[slot("a"), slot("b")], TelegramMessageFormat::Simple);
        assert!(text.starts_with("<b>2 IELTS slots available!</b>"));
        assert_eq!(text.matches("• ").count(), 2);
    }

    #[test]
    fn test_telegram_detailed_includes_link_and_price() {
        let text = telegram_text(&[slot("a")], TelegramMessageFormat::Detailed);
        assert!(text.contains("<a href=\"https://example.test/register/1\">Register</a>"));
        assert!(text.contains("💰 9100000"));
        assert!(text.contains("Safir Office"));
    }

    #[test]
    fn test_telegram_escapes_html() {
        let mut bad = slot("a");
        bad.location = "Main <Hall> & Annex".to_string();
        let text = telegram_text(&[bad], TelegramMessageFormat::Detailed);
        assert!(text.contains("Main &lt;Hall&gt; &amp; Annex"));
        assert!(!text.contains("<Hall>"));
    }

    // ── log line ──────────────────────────────────────────────────────────

    #[test]
    fn test_log_line_shape() {
        let line = log_line(&[slot("a")], Utc::now());
        assert_eq!(line["type"], "new-available");
        assert_eq!(line["appointment_count"], 1);
        assert_eq!(line["appointments"][0]["id"], "a");
        assert_eq!(line["appointments"][0]["city"], "Isfahan");
    }
}

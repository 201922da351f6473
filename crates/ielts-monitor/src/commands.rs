//! Subcommand implementations.
//!
//! Each command prints a human summary to stdout (machine-readable JSON with
//! `--json`), keeps detailed traces in `errors.log`, and maps failures onto
//! the exit-code contract: 0 success, 1 fatal, 2 validation error.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use monitor_core::config::MonitorConfig;
use monitor_core::events::EventBus;
use monitor_core::models::TrackedAppointment;
use monitor_data::history::CheckHistory;
use monitor_data::status_log::LogLevel;
use monitor_data::store::{self, DataPaths};
use monitor_notify::channels::TelegramChannel;
use monitor_runtime::clock::SystemClock;
use monitor_runtime::controller::Controller;
use monitor_runtime::fetcher::{FetchFilters, Fetcher};
use monitor_runtime::http_fetcher::HttpFetcher;
use tokio_util::sync::CancellationToken;

// ── Terminal colours ──────────────────────────────────────────────────────────

pub const RED: &str = "\x1b[31m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const RESET: &str = "\x1b[0m";

// ── start ─────────────────────────────────────────────────────────────────────

/// Run the monitor in the foreground until interrupted.
///
/// The first interrupt requests a graceful stop; a second one forces exit.
pub async fn start(config: MonitorConfig, paths: DataPaths) -> anyhow::Result<u8> {
    let events = EventBus::default();
    let mut controller = Controller::new(
        config.clone(),
        paths,
        Arc::new(HttpFetcher::new(config.base_url.clone(), config.timeouts.fetch())?)
            as Arc<dyn Fetcher>,
        Arc::new(SystemClock),
        events,
    )?;

    // Optional health endpoint, tied to process shutdown.
    let health_cancel = CancellationToken::new();
    if let Some(port) = config.server.health_check_port {
        let base_url = config.base_url.clone();
        let cancel = health_cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = monitor_runtime::health::serve(port, base_url, cancel).await {
                tracing::warn!(error = %e, "health endpoint exited");
            }
        });
    }

    // Console subscriber: one line per event, so a foreground run shows
    // what the loop is doing without tailing the status log.
    let mut events_rx = controller.events().subscribe();
    tokio::spawn(async move {
        use monitor_core::events::MonitorEvent;
        loop {
            match events_rx.recv().await {
                Ok(MonitorEvent::CheckCompleted {
                    appointment_count,
                    available_count,
                    duration_ms,
                    ..
                }) => {
                    println!(
                        "check completed: {appointment_count} slots, {available_count} available ({duration_ms} ms)"
                    );
                }
                Ok(MonitorEvent::NewAppointments { appointments, .. }) => {
                    println!(
                        "{GREEN}{} new available slot(s)!{RESET}",
                        appointments.len()
                    );
                }
                Ok(MonitorEvent::NotificationSent { delivery_status, .. }) => {
                    println!("notification dispatched ({delivery_status})");
                }
                Ok(MonitorEvent::Error { category, detail, .. }) => {
                    eprintln!("{YELLOW}{category} error:{RESET} {detail}");
                }
                Ok(MonitorEvent::StatusChanged { .. }) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    controller.start().await?;
    println!("{GREEN}monitoring started{RESET} (interval {} ms) — press Ctrl+C to stop", config.check_interval);

    tokio::signal::ctrl_c().await?;
    eprintln!("stopping… (press Ctrl+C again to force exit)");
    health_cancel.cancel();

    tokio::select! {
        result = controller.stop() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("forced exit");
            std::process::exit(1);
        }
    }

    if let Some(session) = controller.last_session() {
        println!(
            "session {}: {} checks, {} notifications, {} errors",
            session.session_id,
            session.checks_performed,
            session.notifications_sent,
            session.errors.len()
        );
    }
    Ok(0)
}

// ── status ────────────────────────────────────────────────────────────────────

/// Show tracked appointments and recent check activity from the state files.
pub fn status(paths: &DataPaths, json: bool) -> anyhow::Result<u8> {
    let tracked: HashMap<String, TrackedAppointment> = store::load(&paths.tracking_file());
    let notified: std::collections::HashSet<String> = store::load(&paths.notified_file());
    let history = CheckHistory::open(paths.history_file());

    if json {
        let payload = serde_json::json!({
            "tracked_count": tracked.len(),
            "notified_count": notified.len(),
            "appointments": tracked.values().collect::<Vec<_>>(),
            "recent_checks": history.recent(10),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(0);
    }

    println!("tracked appointments: {}", tracked.len());
    println!("notified (since last rise): {}", notified.len());

    let mut records: Vec<&TrackedAppointment> = tracked.values().collect();
    records.sort_by(|a, b| a.appointment.date.cmp(&b.appointment.date));
    for record in records {
        let slot = &record.appointment;
        println!(
            "  {} {} {:<12} {:<10} {} [{}]",
            slot.date, slot.time, slot.city, slot.exam_type, slot.location, slot.status
        );
    }

    if !history.is_empty() {
        println!("recent checks:");
        for check in history.recent(5) {
            println!(
                "  {} {:?}: {} slots, {} available ({} ms)",
                check.timestamp.format("%Y-%m-%d %H:%M:%S"),
                check.outcome,
                check.appointment_count,
                check.available_count,
                check.duration_ms
            );
        }
    }
    Ok(0)
}

// ── logs ──────────────────────────────────────────────────────────────────────

/// Print the last `lines` status-log events, optionally filtered by level,
/// optionally following for new ones.
pub async fn logs(
    paths: &DataPaths,
    lines: usize,
    level: Option<&str>,
    follow: bool,
) -> anyhow::Result<u8> {
    let path = paths.monitor_log();
    let min_level = level.map(LogLevel::parse);

    let content = std::fs::read_to_string(&path).unwrap_or_default();
    for line in tail_filtered(&content, lines, min_level) {
        println!("{line}");
    }

    if follow {
        let mut offset = content.len() as u64;
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            if size < offset {
                // Rotated: start over from the new file.
                offset = 0;
            }
            if size > offset {
                let content = std::fs::read_to_string(&path).unwrap_or_default();
                let fresh = &content[offset as usize..];
                for line in tail_filtered(fresh, usize::MAX, min_level) {
                    println!("{line}");
                }
                offset = size;
            }
        }
    }
    Ok(0)
}

/// Last `count` lines of `content` that pass the level filter.
fn tail_filtered(content: &str, count: usize, min_level: Option<LogLevel>) -> Vec<String> {
    let matching: Vec<&str> = content
        .lines()
        .filter(|line| match min_level {
            None => true,
            Some(min) => serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|v| {
                    v.get("level")
                        .and_then(|l| l.as_str())
                        .map(|l| LogLevel::parse(l) <= min)
                })
                .unwrap_or(true),
        })
        .collect();
    let start = matching.len().saturating_sub(count);
    matching[start..].iter().map(|s| s.to_string()).collect()
}

// ── scan ──────────────────────────────────────────────────────────────────────

/// Fetch and classify the timetable once.
pub async fn scan(config: &MonitorConfig, json: bool) -> anyhow::Result<u8> {
    let fetcher = HttpFetcher::new(config.base_url.clone(), config.timeouts.fetch())?;
    let filters = FetchFilters {
        cities: config.cities.clone(),
        exam_models: config.exam_models.clone(),
        months: config.months.clone(),
    };

    match fetcher.fetch(&filters).await {
        Ok(result) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "{:?}: {} slots, {} available, {} filled",
                    result.outcome,
                    result.appointment_count,
                    result.available_count,
                    result.filled_count
                );
                for slot in &result.appointments {
                    println!(
                        "  {} {} {:<12} {:<10} [{}]",
                        slot.date, slot.time, slot.city, slot.exam_type, slot.status
                    );
                }
            }
            Ok(0)
        }
        Err(e) => {
            eprintln!("{RED}scan failed:{RESET} {e}");
            eprintln!("  try widening your filters or checking the base URL");
            Ok(1)
        }
    }
}

// ── config-validate ───────────────────────────────────────────────────────────

/// Validate the configuration file, printing every field error.
pub fn config_validate(config_path: &Path) -> anyhow::Result<u8> {
    let config = match MonitorConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{RED}configuration unreadable:{RESET} {e}");
            return Ok(2);
        }
    };

    match config.validate() {
        Ok(()) => {
            println!("{GREEN}configuration is valid{RESET}");
            Ok(0)
        }
        Err(errors) => {
            eprintln!("{RED}configuration invalid:{RESET}");
            for error in &errors {
                eprintln!("  {YELLOW}{}{RESET}: {}", error.field, error.message);
            }
            Ok(2)
        }
    }
}

// ── telegram-test ─────────────────────────────────────────────────────────────

/// Send a test message through the configured telegram channel.
pub async fn telegram_test(config: &MonitorConfig) -> anyhow::Result<u8> {
    let channel = match TelegramChannel::new(&config.telegram) {
        Ok(channel) => channel,
        Err(e) => {
            eprintln!("{RED}telegram not configured:{RESET} {e}");
            eprintln!("  set TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID");
            return Ok(2);
        }
    };

    match channel
        .send_text("<b>ielts-monitor</b>: test message — your telegram channel works")
        .await
    {
        Ok(()) => {
            println!("{GREEN}test message delivered{RESET}");
            Ok(0)
        }
        Err(e) => {
            let detail = e.to_string();
            eprintln!("{RED}test message failed:{RESET} {detail}");
            if detail.contains("401") || detail.contains("Unauthorized") {
                eprintln!("  Check your bot token with @BotFather");
            } else if detail.contains("400") || detail.contains("chat not found") {
                eprintln!("  Check TELEGRAM_CHAT_ID (channels need the @name or -100… id)");
            }
            Ok(1)
        }
    }
}

// ── clear ─────────────────────────────────────────────────────────────────────

/// Delete persisted state files.
pub fn clear(
    paths: &DataPaths,
    appointments: bool,
    notifications: bool,
    inspection: bool,
    all: bool,
    force: bool,
) -> anyhow::Result<u8> {
    let mut targets: Vec<std::path::PathBuf> = Vec::new();
    if appointments || all {
        targets.push(paths.tracking_file());
    }
    if notifications || all {
        targets.push(paths.notified_file());
    }
    if inspection || all {
        targets.push(paths.inspection_file());
    }
    if all {
        targets.push(paths.history_file());
    }

    if targets.is_empty() {
        eprintln!("nothing selected; pass --appointments, --notifications, --inspection or --all");
        return Ok(2);
    }

    if !force {
        eprint!("delete {} state file(s)? [y/N] ", targets.len());
        use std::io::BufRead;
        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            println!("aborted");
            return Ok(0);
        }
    }

    for target in targets {
        match std::fs::remove_file(&target) {
            Ok(()) => println!("removed {}", target.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => eprintln!("{YELLOW}could not remove {}:{RESET} {e}", target.display()),
        }
    }
    Ok(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Audible alert channel.
//!
//! Plays the system alert sound through the platform's player (`paplay` /
//! `aplay` on Linux, `afplay` on macOS); when no player is present, falls
//! back to the terminal bell. Best-effort like the desktop channel.

use async_trait::async_trait;
use monitor_core::error::{MonitorError, Result};
use monitor_core::models::Appointment;

use super::NotificationChannel;

/// Candidate `(player, sound file)` pairs, tried in order.
#[cfg(target_os = "linux")]
const PLAYERS: [(&str, &str); 2] = [
    ("paplay", "/usr/share/sounds/freedesktop/stereo/complete.oga"),
    ("aplay", "/usr/share/sounds/alsa/Front_Center.wav"),
];

#[cfg(target_os = "macos")]
const PLAYERS: [(&str, &str); 1] = [("afplay", "/System/Library/Sounds/Glass.aiff")];

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const PLAYERS: [(&str, &str); 0] = [];

/// System sound channel.
#[derive(Debug, Default)]
pub struct AudioChannel;

impl AudioChannel {
    pub fn new() -> Self {
        Self
    }

    /// Ring the terminal bell as a last resort.
    fn terminal_bell() -> std::io::Result<()> {
        use std::io::Write;
        let mut stdout = std::io::stdout();
        stdout.write_all(b"\x07")?;
        stdout.flush()
    }
}

#[async_trait]
impl NotificationChannel for AudioChannel {
    fn name(&self) -> &'static str {
        "audio"
    }

    async fn deliver(&self, _slots: &[Appointment]) -> Result<()> {
        for (player, sound) in PLAYERS {
            if !std::path::Path::new(sound).exists() {
                continue;
            }
            let spawned = tokio::process::Command::new(player)
                .arg(sound)
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .await;
            if let Ok(status) = spawned {
                if status.success() {
                    tracing::debug!(player, "alert sound played");
                    return Ok(());
                }
            }
        }

        // No player worked; the bell still gives an audible cue in a terminal.
        Self::terminal_bell().map_err(|e| MonitorError::Notification {
            channel: "audio".to_string(),
            detail: format!("no sound player and bell failed: {e}"),
        })
    }
}

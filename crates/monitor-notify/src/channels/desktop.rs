//! Host desktop notifications.
//!
//! Shells out to the platform's notifier: `notify-send` on Linux,
//! `osascript` on macOS, a PowerShell toast on Windows. Failure is
//! best-effort by contract: the dispatcher logs a warning and counts the
//! channel as failed, nothing retries.

use async_trait::async_trait;
use monitor_core::error::{MonitorError, Result};
use monitor_core::models::Appointment;

use super::NotificationChannel;
use crate::message;

/// Desktop toast channel.
#[derive(Debug, Default)]
pub struct DesktopChannel;

impl DesktopChannel {
    pub fn new() -> Self {
        Self
    }

    /// Build the platform command for showing `title` / `body`.
    ///
    /// Returns `None` on platforms without a known notifier.
    fn command(title: &str, body: &str) -> Option<tokio::process::Command> {
        #[cfg(target_os = "linux")]
        {
            let mut cmd = tokio::process::Command::new("notify-send");
            cmd.arg(title).arg(body);
            Some(cmd)
        }
        #[cfg(target_os = "macos")]
        {
            let mut cmd = tokio::process::Command::new("osascript");
            let script = format!(
                "display notification \"{}\" with title \"{}\"",
                body.replace('"', "\\\""),
                title.replace('"', "\\\"")
            );
            cmd.arg("-e").arg(script);
            Some(cmd)
        }
        #[cfg(target_os = "windows")]
        {
            let mut cmd = tokio::process::Command::new("powershell");
            let script = format!(
                "[System.Reflection.Assembly]::LoadWithPartialName('System.Windows.Forms') | Out-Null; \
                 [System.Windows.Forms.MessageBox]::Show('{}', '{}') | Out-Null",
                body.replace('\'', "''"),
                title.replace('\'', "''")
            );
            cmd.arg("-NoProfile").arg("-Command").arg(script);
            Some(cmd)
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            let _ = (title, body);
            None
        }
    }

    async fn show(&self, title: &str, body: &str) -> Result<()> {
        let Some(mut cmd) = Self::command(title, body) else {
            return Err(MonitorError::Notification {
                channel: "desktop".to_string(),
                detail: "no desktop notifier on this platform".to_string(),
            });
        };

        let status = cmd
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map_err(|e| MonitorError::Notification {
                channel: "desktop".to_string(),
                detail: format!("failed to spawn notifier: {e}"),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(MonitorError::Notification {
                channel: "desktop".to_string(),
                detail: format!("notifier exited with {status}"),
            })
        }
    }
}

#[async_trait]
impl NotificationChannel for DesktopChannel {
    fn name(&self) -> &'static str {
        "desktop"
    }

    async fn deliver(&self, slots: &[Appointment]) -> Result<()> {
        let title = message::desktop_title(slots);
        let body = message::desktop_body(slots);
        self.show(&title, &body).await?;
        tracing::debug!(slots = slots.len(), "desktop notification shown");
        Ok(())
    }

    async fn deliver_alert(&self, title: &str, body: &str) -> Result<()> {
        self.show(title, body).await
    }
}

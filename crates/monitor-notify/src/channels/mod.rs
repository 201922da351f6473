//! Delivery channels.
//!
//! Each channel implements [`NotificationChannel`] and owns its own retry
//! policy; the dispatcher only sees a single `deliver` outcome per channel.

use async_trait::async_trait;
use monitor_core::error::Result;
use monitor_core::models::Appointment;

pub mod audio;
pub mod desktop;
pub mod log_file;
pub mod telegram;

pub use audio::AudioChannel;
pub use desktop::DesktopChannel;
pub use log_file::LogFileChannel;
pub use telegram::TelegramChannel;

/// A single notification delivery target.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Stable channel name used in reports and logs.
    fn name(&self) -> &'static str;

    /// Deliver one notification describing `slots`.
    ///
    /// Implementations retry internally per their channel policy; a returned
    /// error means the channel has given up on this notification.
    async fn deliver(&self, slots: &[Appointment]) -> Result<()>;

    /// Deliver a free-form high-severity alert (persistent errors).
    ///
    /// Channels without a text surface may keep the default no-op.
    async fn deliver_alert(&self, _title: &str, _body: &str) -> Result<()> {
        Ok(())
    }
}

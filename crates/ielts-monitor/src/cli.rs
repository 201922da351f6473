//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// IELTS appointment monitor
#[derive(Parser, Debug)]
#[command(
    name = "ielts-monitor",
    about = "Watches the IELTS timetable and alerts on newly available slots",
    version
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "config/monitor-config.json")]
    pub config: PathBuf,

    /// Root directory for data/ and logs/ (defaults to the working directory)
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the monitor in the foreground until interrupted
    Start,

    /// Show tracked appointments and recent check activity
    Status {
        /// Print machine-readable JSON instead of the summary
        #[arg(long)]
        json: bool,
    },

    /// Print recent status-log events
    Logs {
        /// Number of lines to show
        #[arg(long, default_value = "50")]
        lines: usize,
        /// Only show events at this level or above (error, warn, info, debug)
        #[arg(long)]
        level: Option<String>,
        /// Keep following the log for new events
        #[arg(long)]
        follow: bool,
    },

    /// Fetch and classify the timetable once, then exit
    Scan {
        /// Print machine-readable JSON instead of the table
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration file and report every problem
    ConfigValidate,

    /// Send a test message through the configured telegram channel
    TelegramTest,

    /// Delete persisted state files
    Clear {
        /// Clear tracked appointments
        #[arg(long)]
        appointments: bool,
        /// Clear the notified-key set
        #[arg(long)]
        notifications: bool,
        /// Clear captured inspection data
        #[arg(long)]
        inspection: bool,
        /// Clear everything, including check history
        #[arg(long)]
        all: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

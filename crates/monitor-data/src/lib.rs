//! Persistence layer for the IELTS appointment monitor.
//!
//! Owns the durable JSON state files (tracking, notified keys, inspection
//! data, check history) and the rotating structured status log.

pub mod history;
pub mod inspection;
pub mod status_log;
pub mod store;

pub use monitor_core as core;

//! Notification delivery layer for the IELTS appointment monitor.
//!
//! The [`dispatcher::Dispatcher`] fans one notification out across the
//! enabled [`channels`], each with its own failure policy, and reports
//! per-channel success back to the scheduler.

pub mod channels;
pub mod dispatcher;
pub mod message;

pub use monitor_core as core;

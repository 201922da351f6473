//! Core domain layer for the IELTS appointment monitor.
//!
//! Defines the appointment and tracking models, the configuration surface
//! with total validation, the error taxonomy, the event bus, and secret
//! masking. Higher layers (data, notify, runtime) all build on this crate.

pub mod config;
pub mod error;
pub mod events;
pub mod masking;
pub mod models;

pub use error::{MonitorError, Result};

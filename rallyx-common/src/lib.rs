//! # RallyX Common Library
//!
//! Shared code for the RallyX timing and scoring services including:
//! - Database initialisation, schema version check and row models
//! - Registry (key/value) access
//! - Bootstrap configuration loading
//! - Timing event value types
//! - Run/event time formatting and parsing

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{Channel, TimingEvent};

//! # qtag common library
//!
//! Shared code for the quality-tag overlay crates:
//! - Error type and result alias
//! - TOML configuration with environment overrides
//! - Logging bootstrap
//! - Page event bus (navigation, mutation and viewport events)
//! - Timestamp and clock utilities

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod time;

pub use error::{Error, Result};

//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the catalog sync engine:
//! - Logging and tracing bootstrap
//! - Engine configuration
//! - Progress channel for live session reporting

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};

//! Quarry Common - Shared utilities and types
//!
//! This crate provides functionality used across the Quarry column engine:
//! - Error types and handling
//! - Configuration management
//! - Metrics recorders
//! - Row identifiers, dynamic values and query operators

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::Config;
pub use error::{ColumnError, Error, Result};
pub use types::*;

use config::LoggingConfig;

/// Install a `tracing` subscriber for the process.
///
/// `RUST_LOG` wins over the configured level. Calling this more than once is
/// harmless; later calls leave the first subscriber in place.
pub fn init_logging(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

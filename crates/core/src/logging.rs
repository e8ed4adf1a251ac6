//! Structured logging infrastructure for Sentinel.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output and environment-based configuration.

use crate::config::{LogFormat, SystemConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system from the `[system]` configuration section.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_from_config(system: &SystemConfig) {
    match system.log_format {
        LogFormat::Pretty => init(&system.log_level),
        LogFormat::Json => init_json(&system.log_level),
    }
}

/// Initialize the logging system with human-readable output.
///
/// # Example
/// ```no_run
/// use sentinel_core::logging;
///
/// logging::init("info");
/// tracing::info!("Node started");
/// ```
pub fn init(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize the logging system with JSON output for log collectors.
///
/// # Example
/// ```no_run
/// use sentinel_core::logging;
///
/// logging::init_json("info");
/// tracing::info!(node_id = 3, "Node started");
/// ```
pub fn init_json(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| configured(default_level))
}

fn configured(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

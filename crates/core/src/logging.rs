//! Structured logging infrastructure for WildLink.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output and environment-based configuration.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system with structured output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use wildlink_core::logging;
///
/// logging::init();
/// tracing::info!("Node started");
/// ```
pub fn init() {
    init_with_level("info", false);
}

/// Initialize the logging system with JSON output for deployed nodes.
///
/// Suitable for shipping logs off-device for later analysis.
/// Log level can be configured via the `RUST_LOG` environment variable.
pub fn init_json() {
    init_with_level("info", true);
}

/// Initialize from the `[logging]` config section.
pub fn init_from_config(config: &LoggingConfig) {
    init_with_level(&config.level, config.json);
}

fn init_with_level(default_level: &str, json: bool) {
    let filter = build_filter(default_level);

    let registry = tracing_subscriber::registry().with(filter);
    // A subscriber may already be installed (tests, embedding hosts)
    let result = if json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
    };
    if let Err(err) = result {
        tracing::debug!(error = %err, "Logging already initialized");
    }
}

fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

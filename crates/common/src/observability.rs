//! Logging initialization for Sentinel cluster binaries

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, EnvFilter};

/// Environment variable that overrides the configured log format
pub const LOG_FORMAT_ENV: &str = "SENTINEL_LOG_FORMAT";

/// Log output format
///
/// # Configuration
///
/// ```kdl
/// logging {
///     format "json"  // or "pretty"
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON, one event per line (default)
    #[default]
    Json,
    /// Human-readable multi-line output for development
    Pretty,
}

impl LogFormat {
    /// Parse format from string (case-insensitive)
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" | "text" | "human" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

/// Initialize the tracing/logging subsystem
///
/// The level comes from `RUST_LOG` when set, otherwise from `default_level`.
/// The format comes from `SENTINEL_LOG_FORMAT` when set, otherwise from
/// `format`.
pub fn init_tracing(default_level: &str, format: LogFormat) -> Result<()> {
    let format = std::env::var(LOG_FORMAT_ENV)
        .map(|s| LogFormat::from_str_loose(&s))
        .unwrap_or(format);

    let json_layer = (format == LogFormat::Json).then(|| {
        tracing_fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });

    let pretty_layer = (format == LogFormat::Pretty).then(|| {
        tracing_fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
    });

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    info!(format = %format, "Tracing initialized");
    Ok(())
}

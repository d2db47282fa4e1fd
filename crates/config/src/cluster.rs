//! Cluster coordination configuration types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use validator::Validate;

use sentinel_common::LogFormat;

/// Shared KV backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process store; state is not shared with other replicas
    #[default]
    Memory,
    /// Redis instance shared by all replicas
    Redis,
}

impl BackendKind {
    /// Parse a backend name
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Some(BackendKind::Memory),
            "redis" | "valkey" => Some(BackendKind::Redis),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Redis => write!(f, "redis"),
        }
    }
}

/// KV backend connection settings
///
/// # Configuration
///
/// ```kdl
/// backend "redis" {
///     endpoint "redis://10.0.0.5:6379/0"
///     connect-timeout-ms 2000
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_backend_endpoint"))]
pub struct BackendConfig {
    /// Backend implementation
    #[serde(default)]
    pub kind: BackendKind,

    /// Connection URL (required for networked backends)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Connection establishment timeout
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 1, max = 60_000, message = "connect-timeout-ms must be 1..=60000"))]
    pub connect_timeout_ms: u64,
}

impl BackendConfig {
    /// Connection timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Memory,
            endpoint: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn validate_backend_endpoint(backend: &BackendConfig) -> Result<(), validator::ValidationError> {
    match backend.kind {
        BackendKind::Memory => Ok(()),
        BackendKind::Redis => {
            let Some(endpoint) = backend.endpoint.as_deref() else {
                let mut err = validator::ValidationError::new("endpoint_required");
                err.message = Some("redis backend requires an endpoint".into());
                return Err(err);
            };

            let url = url::Url::parse(endpoint).map_err(|e| {
                let mut err = validator::ValidationError::new("endpoint_invalid");
                err.message = Some(format!("invalid endpoint '{}': {}", endpoint, e).into());
                err
            })?;

            match url.scheme() {
                "redis" | "rediss" | "redis+unix" | "unix" => Ok(()),
                other => {
                    let mut err = validator::ValidationError::new("endpoint_scheme");
                    err.message = Some(
                        format!(
                            "unsupported endpoint scheme '{}', expected redis, rediss or unix",
                            other
                        )
                        .into(),
                    );
                    Err(err)
                }
            }
        }
    }
}

/// Settings shared by the ACME record store and challenge coordinator
///
/// # Configuration
///
/// ```kdl
/// acme-cluster {
///     replica-id "edge-1"
///     lock-ttl-secs 20
///     backend "redis" {
///         endpoint "redis://10.0.0.5:6379/0"
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ClusterConfig {
    /// Identity written into the leadership record; defaults to the hostname
    #[serde(default)]
    #[validate(length(min = 1, max = 253, message = "replica-id must be 1..=253 characters"))]
    pub replica_id: Option<String>,

    /// Lease for distributed locks taken by this replica
    #[serde(default = "default_lock_ttl_secs")]
    #[validate(range(min = 1, max = 300, message = "lock-ttl-secs must be 1..=300"))]
    pub lock_ttl_secs: u64,

    /// Shared KV backend
    #[serde(default)]
    #[validate(nested)]
    pub backend: BackendConfig,
}

impl ClusterConfig {
    /// Lock lease as a `Duration`
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            replica_id: None,
            lock_ttl_secs: default_lock_ttl_secs(),
            backend: BackendConfig::default(),
        }
    }
}

/// Log output settings
///
/// `RUST_LOG` and `SENTINEL_LOG_FORMAT` override these at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LoggingConfig {
    /// Default level directive (e.g. "info", "sentinel_acme=debug")
    #[serde(default = "default_log_level")]
    #[validate(length(min = 1, message = "logging level must not be empty"))]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

pub(crate) fn default_connect_timeout_ms() -> u64 {
    2_000
}

pub(crate) fn default_lock_ttl_secs() -> u64 {
    20
}

pub(crate) fn default_log_level() -> String {
    "info".to_string()
}

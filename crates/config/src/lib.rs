//! Configuration for Sentinel cluster coordination
//!
//! Loads the settings shared by the ACME record store and the HTTP-01
//! challenge coordinator: which KV backend the replicas share, how this
//! replica identifies itself, lock leases, and log output.
//!
//! # Module Organization
//!
//! - [`cluster`]: `acme-cluster` and `logging` configuration types
//! - [`kdl`]: KDL format parsing
//! - [`validate`]: Logic checks and warnings beyond schema validation
//!
//! # Example
//!
//! ```kdl
//! acme-cluster {
//!     replica-id "edge-1"
//!     lock-ttl-secs 20
//!     backend "redis" {
//!         endpoint "redis://127.0.0.1:6379/0"
//!         connect-timeout-ms 2000
//!     }
//! }
//!
//! logging {
//!     level "info"
//!     format "json"
//! }
//! ```

pub mod cluster;
pub mod kdl;
pub mod validate;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;
use validator::Validate;

pub use cluster::{BackendConfig, BackendKind, ClusterConfig, LoggingConfig};
pub use sentinel_common::LogFormat;
pub use validate::{
    validate_config, ErrorCategory, ValidationError, ValidationResult, ValidationWarning,
};

/// Configuration used when no file is given
pub const DEFAULT_CONFIG_KDL: &str = r#"
acme-cluster {
    lock-ttl-secs 20
    backend "memory"
}

logging {
    level "info"
    format "json"
}
"#;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Shared state and coordination settings
    #[serde(default, rename = "acme-cluster", alias = "cluster")]
    #[validate(nested)]
    pub cluster: ClusterConfig,

    /// Log output settings
    #[serde(default)]
    #[validate(nested)]
    pub logging: LoggingConfig,
}

// ============================================================================
// Config Implementation
// ============================================================================

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("kdl");

        match extension {
            "kdl" => Self::from_kdl(&content),
            "json" => Self::from_json(&content),
            _ => Err(anyhow::anyhow!("Unsupported config format: {}", extension)),
        }
    }

    /// Load the default embedded configuration, falling back to the
    /// programmatic default if it fails to parse
    pub fn default_embedded() -> Result<Self> {
        Self::from_kdl(DEFAULT_CONFIG_KDL).or_else(|e| {
            warn!(
                "Failed to parse embedded KDL config, using programmatic default: {}",
                e
            );
            Ok(Self::default())
        })
    }

    /// Parse configuration from KDL format
    pub fn from_kdl(content: &str) -> Result<Self> {
        let doc: ::kdl::KdlDocument = content.parse().map_err(|e: ::kdl::KdlError| {
            use miette::Diagnostic;

            let mut error_msg = String::new();
            error_msg.push_str("KDL configuration parse error:\n\n");

            let mut found_details = false;
            if let Some(related) = e.related() {
                for diagnostic in related {
                    error_msg.push_str(&format!("  {}\n", diagnostic));
                    found_details = true;

                    if let Some(labels) = diagnostic.labels() {
                        for label in labels {
                            let (line, col) = kdl::offset_to_line_col(content, label.offset());
                            error_msg
                                .push_str(&format!("\n  --> at line {}, column {}\n", line, col));

                            if let Some(line_content) = content.lines().nth(line.saturating_sub(1))
                            {
                                error_msg.push_str(&format!("{:>4} | {}\n", line, line_content));
                                error_msg.push_str(&format!(
                                    "     | {}^",
                                    " ".repeat(col.saturating_sub(1))
                                ));
                                if let Some(label_msg) = label.label() {
                                    error_msg.push_str(&format!(" {}", label_msg));
                                }
                                error_msg.push('\n');
                            }
                        }
                    }

                    if let Some(help) = diagnostic.help() {
                        error_msg.push_str(&format!("\n  Help: {}\n", help));
                    }
                }
            }

            if !found_details {
                error_msg.push_str(&format!("  {}\n", e));
            }

            anyhow::anyhow!("{}", error_msg)
        })?;

        kdl::parse_kdl_document(doc)
    }

    /// Parse configuration from JSON format
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse JSON configuration")
    }

    /// Validate the configuration, logging warnings and failing on errors
    pub fn validate(&self) -> Result<()> {
        let result = validate_config(self);

        for warning in &result.warnings {
            warn!(warning = %warning, "Configuration warning");
        }

        if !result.is_valid() {
            let messages: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
            return Err(anyhow::anyhow!(
                "Configuration validation failed:\n  {}",
                messages.join("\n  ")
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_embedded_parses() {
        let config = Config::default_embedded().unwrap();
        assert_eq!(config.cluster.backend.kind, BackendKind::Memory);
        assert_eq!(config.cluster.lock_ttl_secs, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_kdl_syntax_error_has_location() {
        let err = Config::from_kdl("acme-cluster {\n  replica-id \"edge-1\n}").unwrap_err();
        assert!(err.to_string().contains("KDL configuration parse error"));
    }

    #[test]
    fn test_from_json() {
        let config = Config::from_json(
            r#"{
                "acme-cluster": {
                    "replica_id": "edge-2",
                    "backend": { "kind": "redis", "endpoint": "rediss://cache:6380/1" }
                },
                "logging": { "format": "pretty" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.cluster.replica_id.as_deref(), Some("edge-2"));
        assert_eq!(config.cluster.lock_ttl_secs, 20);
        assert_eq!(config.cluster.backend.kind, BackendKind::Redis);
        assert_eq!(config.cluster.backend.connect_timeout_ms, 2_000);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_kdl() {
        let mut file = tempfile::Builder::new().suffix(".kdl").tempfile().unwrap();
        write!(
            file,
            r#"acme-cluster {{
                replica-id "edge-3"
                backend "redis" {{
                    endpoint "redis://127.0.0.1:6379/0"
                }}
            }}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.cluster.replica_id.as_deref(), Some("edge-3"));
        assert_eq!(config.cluster.backend.kind, BackendKind::Redis);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported config format"));
    }

    #[test]
    fn test_validate_rejects_redis_without_endpoint() {
        let config = Config::from_kdl(r#"acme-cluster { backend "redis" }"#).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("validation failed"));
    }
}

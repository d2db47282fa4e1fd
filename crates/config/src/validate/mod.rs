//! Configuration validation
//!
//! Schema checks come from the `validator` derives on the config types;
//! this module layers cluster-level logic checks and warnings on top.

use std::fmt;

use validator::Validate;

use crate::{BackendKind, Config};

/// Lock leases below this are likely to expire mid read-modify-write
const MIN_RECOMMENDED_LOCK_TTL_SECS: u64 = 5;

/// Validation error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Schema/syntax error
    Schema,
    /// Backend connectivity settings
    Backend,
    /// Configuration logic error
    Logic,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Schema => write!(f, "Schema"),
            ErrorCategory::Backend => write!(f, "Backend"),
            ErrorCategory::Logic => write!(f, "Logic"),
        }
    }
}

/// Validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Validation warning
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Validation result containing errors and warnings
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Check if validation passed (no errors)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Run every check against a parsed configuration
pub fn validate_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    if let Err(errors) = config.cluster.validate() {
        result.add_error(ValidationError::new(
            ErrorCategory::Schema,
            format!("acme-cluster: {}", errors),
        ));
    }
    if let Err(errors) = config.logging.validate() {
        result.add_error(ValidationError::new(
            ErrorCategory::Schema,
            format!("logging: {}", errors),
        ));
    }

    result.merge(check_backend(config));
    result.merge(check_logic(config));
    result
}

fn check_backend(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let backend = &config.cluster.backend;

    match backend.kind {
        BackendKind::Memory => {
            if backend.endpoint.is_some() {
                result.add_warning(ValidationWarning::new(
                    "memory backend ignores 'endpoint'",
                ));
            }
            result.add_warning(ValidationWarning::new(
                "memory backend is not shared between replicas; \
                 challenge leadership and certificate records are local to this process",
            ));
        }
        BackendKind::Redis => {
            if let Some(endpoint) = backend.endpoint.as_deref() {
                if endpoint.starts_with("redis://") && !is_loopback_endpoint(endpoint) {
                    result.add_warning(ValidationWarning::new(format!(
                        "backend endpoint '{}' is not TLS; account keys travel in cleartext",
                        endpoint
                    )));
                }
            }
        }
    }

    result
}

fn check_logic(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.cluster.lock_ttl_secs < MIN_RECOMMENDED_LOCK_TTL_SECS {
        result.add_warning(ValidationWarning::new(format!(
            "lock-ttl-secs {} is below {}s; a slow backend round-trip can outlive the lock",
            config.cluster.lock_ttl_secs, MIN_RECOMMENDED_LOCK_TTL_SECS
        )));
    }

    if let Some(replica_id) = config.cluster.replica_id.as_deref() {
        if replica_id.trim() != replica_id {
            result.add_error(ValidationError::new(
                ErrorCategory::Logic,
                format!(
                    "replica-id '{}' has leading or trailing whitespace",
                    replica_id
                ),
            ));
        }
    }

    result
}

fn is_loopback_endpoint(endpoint: &str) -> bool {
    url::Url::parse(endpoint)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .map(|h| h == "localhost" || h == "127.0.0.1" || h == "[::1]" || h == "::1")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BackendConfig, ClusterConfig};

    #[test]
    fn test_default_config_warns_about_memory_backend() {
        let result = validate_config(&Config::default());
        assert!(result.is_valid());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("not shared")));
    }

    #[test]
    fn test_redis_without_endpoint_is_error() {
        let config = Config {
            cluster: ClusterConfig {
                backend: BackendConfig {
                    kind: BackendKind::Redis,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(!result.is_valid());
        assert_eq!(result.errors[0].category, ErrorCategory::Schema);
    }

    #[test]
    fn test_cleartext_remote_redis_warns() {
        let config = Config {
            cluster: ClusterConfig {
                backend: BackendConfig {
                    kind: BackendKind::Redis,
                    endpoint: Some("redis://10.0.0.5:6379".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(result.is_valid());
        assert!(result.has_warnings());

        let local = Config {
            cluster: ClusterConfig {
                backend: BackendConfig {
                    kind: BackendKind::Redis,
                    endpoint: Some("redis://127.0.0.1:6379".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(!validate_config(&local).has_warnings());
    }

    #[test]
    fn test_short_lock_ttl_warns() {
        let config = Config {
            cluster: ClusterConfig {
                lock_ttl_secs: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(result.is_valid());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("lock-ttl-secs 2")));
    }

    #[test]
    fn test_replica_id_whitespace_is_error() {
        let config = Config {
            cluster: ClusterConfig {
                replica_id: Some(" edge-1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(!result.is_valid());
        assert_eq!(result.errors[0].category, ErrorCategory::Logic);
    }
}

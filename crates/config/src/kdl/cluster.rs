//! Cluster and logging KDL parsing.

use anyhow::Result;
use tracing::trace;

use sentinel_common::LogFormat;

use crate::cluster::*;

use super::helpers::{get_first_arg_string, get_string_entry, get_u64_entry};

/// Parse the `acme-cluster` block
pub fn parse_cluster_config(node: &kdl::KdlNode) -> Result<ClusterConfig> {
    trace!("Parsing acme-cluster configuration block");

    let backend = match node.children().and_then(|children| children.get("backend")) {
        Some(backend_node) => parse_backend(backend_node)?,
        None => BackendConfig::default(),
    };

    let config = ClusterConfig {
        replica_id: get_string_entry(node, "replica-id"),
        lock_ttl_secs: get_u64_entry(node, "lock-ttl-secs")?
            .unwrap_or_else(default_lock_ttl_secs),
        backend,
    };

    trace!(
        replica_id = ?config.replica_id,
        lock_ttl_secs = config.lock_ttl_secs,
        backend = %config.backend.kind,
        "Parsed acme-cluster configuration"
    );

    Ok(config)
}

/// Parse a `backend "<kind>" { ... }` node
fn parse_backend(node: &kdl::KdlNode) -> Result<BackendConfig> {
    let kind_name = get_first_arg_string(node).ok_or_else(|| {
        anyhow::anyhow!(
            "Backend requires a kind argument, e.g., backend \"redis\" {{ endpoint \"redis://127.0.0.1:6379\" }}"
        )
    })?;

    let kind = BackendKind::parse(&kind_name).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid backend '{}'. Valid backends: memory, redis",
            kind_name
        )
    })?;

    Ok(BackendConfig {
        kind,
        endpoint: get_string_entry(node, "endpoint"),
        connect_timeout_ms: get_u64_entry(node, "connect-timeout-ms")?
            .unwrap_or_else(default_connect_timeout_ms),
    })
}

/// Parse the `logging` block
pub fn parse_logging_config(node: &kdl::KdlNode) -> Result<LoggingConfig> {
    trace!("Parsing logging configuration block");

    Ok(LoggingConfig {
        level: get_string_entry(node, "level").unwrap_or_else(default_log_level),
        format: get_string_entry(node, "format")
            .map(|s| LogFormat::from_str_loose(&s))
            .unwrap_or_default(),
    })
}

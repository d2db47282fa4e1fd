//! KDL configuration parsing.
//!
//! - `helpers`: Common parsing utility functions
//! - `cluster`: `acme-cluster` and `logging` block parsing

mod cluster;
mod helpers;

pub use helpers::{
    get_first_arg_string, get_int_entry, get_string_entry, get_u64_entry, offset_to_line_col,
};

pub use cluster::{parse_cluster_config, parse_logging_config};

use anyhow::Result;

use crate::Config;

// ============================================================================
// Top-Level Document Parser
// ============================================================================

/// Convert a parsed KDL document to Config
pub fn parse_kdl_document(doc: kdl::KdlDocument) -> Result<Config> {
    let mut cluster = None;
    let mut logging = None;

    for node in doc.nodes() {
        match node.name().value() {
            "acme-cluster" => {
                if cluster.is_some() {
                    return Err(anyhow::anyhow!(
                        "Duplicate 'acme-cluster' block; only one is allowed"
                    ));
                }
                cluster = Some(parse_cluster_config(node)?);
            }
            "logging" => {
                logging = Some(parse_logging_config(node)?);
            }
            other => {
                return Err(anyhow::anyhow!(
                    "Unknown top-level configuration block: '{}'\n\
                     Valid blocks are: acme-cluster, logging",
                    other
                ));
            }
        }
    }

    Ok(Config {
        cluster: cluster.unwrap_or_default(),
        logging: logging.unwrap_or_default(),
    })
}

//! Sentinel Common
//!
//! Shared building blocks for the Sentinel cluster crates:
//!
//! - [`ReplicaId`] - stable identity of one proxy replica
//! - [`ExponentialBackoff`] / [`retry_notify`] - bounded retry with jitter
//! - [`init_tracing`] - structured logging setup for binaries

pub mod backoff;
pub mod ids;
pub mod observability;

pub use backoff::{retry_notify, Backoff, ExponentialBackoff};
pub use ids::ReplicaId;
pub use observability::{init_tracing, LogFormat};

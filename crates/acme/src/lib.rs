//! Clustered ACME state for Sentinel
//!
//! Lets several Sentinel replicas share ACME account and certificate records
//! and agree on which replica presents HTTP-01 challenges, using a shared
//! key-value backend ([`sentinel_kv::KvStore`]) as the only channel between
//! them.
//!
//! # Components
//!
//! - [`KvCertificateStore`] - lock-guarded account/certificate persistence
//! - [`LeaderElection`] - TTL-based challenge leadership
//! - [`ChallengeCoordinator`] - present/clean up challenges and answer
//!   validation probes from any replica
//! - [`AcmeMetrics`] - Prometheus counters for the above
//!
//! # Challenge Flow
//!
//! 1. The ACME client calls [`ChallengeProvider::present`] on some replica
//! 2. That replica claims or renews leadership, or fails with `NotLeader`
//! 3. The leader writes `{domain}_{token}` under the token's lock
//! 4. The CA requests `/.well-known/acme-challenge/<token>` on any replica
//! 5. [`ChallengeCoordinator::serve_http`] looks the token up, retrying while
//!    the write is not yet visible, and answers 200 or 404
//! 6. The ACME client calls [`ChallengeProvider::clean_up`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sentinel_acme::{ChallengeCoordinator, ChallengeProvider};
//! use sentinel_common::ReplicaId;
//! use sentinel_kv::MemoryStore;
//!
//! # async fn run() -> Result<(), sentinel_acme::AcmeError> {
//! let store = Arc::new(MemoryStore::new());
//! let coordinator = ChallengeCoordinator::new(store, ReplicaId::new("edge-1"));
//! coordinator.present("example.com", "tok123", "tok123.thumbprint").await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod challenge;
mod error;
pub mod keys;
mod leader;
mod metrics;
mod records;
mod storage;

pub use backend::{connect_backend, resolve_replica_id};
pub use challenge::{
    default_lookup_backoff, domain_from_host, ChallengeCoordinator, ChallengeProvider,
    ACME_CHALLENGE_PREFIX, CHALLENGE_POLL_INTERVAL, CHALLENGE_TIMEOUT,
};
pub use error::{AcmeError, AcmeResult};
pub use leader::{LeaderElection, Leadership, CHALLENGE_MAIN_TTL};
pub use metrics::AcmeMetrics;
pub use records::{Account, CertAndStore, Certificate, Domain, Registration, StoredData};
pub use storage::{CertificateStore, KvCertificateStore};

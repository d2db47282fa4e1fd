//! ACME cluster error types

use sentinel_kv::KvError;
use thiserror::Error;

/// Result alias for record store and challenge coordinator operations
pub type AcmeResult<T> = Result<T, AcmeError>;

/// Errors surfaced by the record store and challenge coordinator
#[derive(Debug, Error)]
pub enum AcmeError {
    /// A KV operation (exists/get/put/delete/watch) failed
    #[error("KV backend error: {0}")]
    Backend(#[from] KvError),

    /// The distributed lock guarding a key could not be taken
    #[error("Failed to acquire lock '{key}': {source}")]
    LockAcquisition {
        key: String,
        #[source]
        source: KvError,
    },

    /// A record could not be serialized
    #[error("Failed to encode record '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A stored record could not be deserialized
    #[error("Failed to decode record '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Another replica holds challenge leadership
    #[error("Replica '{replica}' is not the HTTP challenge leader (current leader: '{leader}')")]
    NotLeader { replica: String, leader: String },

    /// Challenge token is not (yet) visible in the backend
    #[error("Cannot find challenge for token '{token}' ({domain})")]
    ChallengeNotFound { domain: String, token: String },

    /// Local replica identity could not be resolved
    #[error("Failed to resolve replica identity: {0}")]
    Identity(String),
}

impl AcmeError {
    /// Leadership denial is an expected condition, not a backend fault
    pub fn is_not_leader(&self) -> bool {
        matches!(self, AcmeError::NotLeader { .. })
    }
}

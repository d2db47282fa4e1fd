//! KV backend error types

use thiserror::Error;

/// Result type for KV operations
pub type KvResult<T> = Result<T, KvError>;

/// Errors returned by a [`KvStore`](crate::KvStore) backend
#[derive(Debug, Error)]
pub enum KvError {
    /// Key does not exist (or its TTL lapsed)
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Backend unreachable or connection dropped
    #[error("Backend connection error: {0}")]
    Connection(String),

    /// Backend rejected or failed the operation
    #[error("Backend operation failed: {0}")]
    Backend(String),

    /// Distributed lock could not be acquired
    #[error("Failed to acquire lock '{key}': {message}")]
    Lock { key: String, message: String },

    /// Unlock attempted on a lock this locker does not hold
    #[error("Lock '{0}' is not held by this locker")]
    LockNotHeld(String),

    /// Watch could not be established
    #[error("Failed to watch key '{key}': {message}")]
    Watch { key: String, message: String },
}

impl KvError {
    /// Whether this error means the key is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, KvError::KeyNotFound(_))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for KvError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
            KvError::Connection(e.to_string())
        } else {
            KvError::Backend(e.to_string())
        }
    }
}

//! Sentinel KV
//!
//! The key-value capability contract that Sentinel replicas use as their only
//! cross-instance communication channel, plus interchangeable backends.
//!
//! # Contract
//!
//! Any backend offering these primitives is substitutable:
//!
//! - `exists` / `get` / `put` (optional TTL) / `delete`
//! - `new_lock` - a distributed lock with TTL, returned as a [`Locker`]
//! - `watch` - a stream of change events for one key
//!
//! `get` on an absent key is an error ([`KvError::KeyNotFound`]); callers
//! that need to tell "absent" from "failed" check `exists` first.
//!
//! # Backends
//!
//! - [`MemoryStore`] - in-process, TTL-aware, used by tests and single-node setups
//! - `RedisStore` - shared by all replicas (cargo feature `redis`)
//!
//! # Locking
//!
//! Lock acquisitions should go through [`LockGuard`], which releases the
//! lock on every exit path including panics and task cancellation.

mod error;
mod lock;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

pub use error::{KvError, KvResult};
pub use lock::LockGuard;
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// Lock TTL used when the caller does not specify one
///
/// Bounds how long a crashed holder can block other replicas.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(20);

/// Stream of change events produced by [`KvStore::watch`]
///
/// Lazy, unbounded and not restartable: once it ends, open a new watch.
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Options for [`KvStore::put`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Expire the key after this long; `None` keeps it until deleted
    pub ttl: Option<Duration>,
}

impl WriteOptions {
    /// Write with an expiry
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

/// Options for [`KvStore::new_lock`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockOptions {
    /// Lock lease; defaults to [`DEFAULT_LOCK_TTL`]
    pub ttl: Option<Duration>,
}

impl LockOptions {
    /// Lock with an explicit lease
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }

    /// Effective lease for this lock
    pub fn effective_ttl(&self) -> Duration {
        self.ttl.unwrap_or(DEFAULT_LOCK_TTL)
    }
}

/// What happened to a watched key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// Key was written
    Put,
    /// Key was deleted
    Delete,
    /// Key's TTL lapsed
    Expire,
}

/// A raw change notification for a watched key
///
/// `value` carries the new bytes for [`WatchEventKind::Put`] when the backend
/// has them at hand; consumers that need a consistent view re-fetch anyway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: String,
    pub kind: WatchEventKind,
    pub value: Option<Bytes>,
}

/// Key-value capability required by the cluster coordination code
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Short backend name for logs ("memory", "redis")
    fn backend_name(&self) -> &'static str;

    /// Check whether `key` currently exists
    async fn exists(&self, key: &str) -> KvResult<bool>;

    /// Fetch the value of `key`; absent keys are [`KvError::KeyNotFound`]
    async fn get(&self, key: &str) -> KvResult<Bytes>;

    /// Write `value` under `key`, replacing any previous value
    async fn put(&self, key: &str, value: &[u8], options: Option<&WriteOptions>) -> KvResult<()>;

    /// Remove `key`; absent keys are [`KvError::KeyNotFound`]
    async fn delete(&self, key: &str) -> KvResult<()>;

    /// Create a lock handle for `key` without acquiring it
    async fn new_lock(&self, key: &str, options: Option<&LockOptions>)
        -> KvResult<Box<dyn Locker>>;

    /// Subscribe to changes of `key`
    async fn watch(&self, key: &str) -> KvResult<WatchStream>;
}

/// Handle to one distributed lock
#[async_trait]
pub trait Locker: Send + Sync {
    /// Block until the lock is acquired or the backend fails
    async fn lock(&self) -> KvResult<()>;

    /// Release the lock
    async fn unlock(&self) -> KvResult<()>;
}

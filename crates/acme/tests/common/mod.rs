//! Shared test backends for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use sentinel_acme::{default_lookup_backoff, ChallengeCoordinator};
use sentinel_common::{ExponentialBackoff, ReplicaId};
use sentinel_kv::{
    KvError, KvResult, KvStore, LockOptions, Locker, MemoryStore, WatchStream, WriteOptions,
};

/// Lookup schedule without jitter so elapsed times are reproducible
pub fn fixed_lookup_backoff() -> ExponentialBackoff {
    default_lookup_backoff().with_randomization_factor(0.0)
}

/// A simulated replica sharing `store`
pub fn replica(store: Arc<dyn KvStore>, id: &str) -> ChallengeCoordinator {
    ChallengeCoordinator::new(store, ReplicaId::new(id)).with_lookup_backoff(fixed_lookup_backoff())
}

/// Backend that hides one key from `exists` for the first `hidden_reads` checks
///
/// Models a replica whose view of the backend lags behind the writer.
pub struct DelayedVisibilityStore {
    inner: MemoryStore,
    key: String,
    hidden_reads: usize,
    exists_calls: AtomicUsize,
}

impl DelayedVisibilityStore {
    pub fn new(inner: MemoryStore, key: &str, hidden_reads: usize) -> Self {
        Self {
            inner,
            key: key.to_string(),
            hidden_reads,
            exists_calls: AtomicUsize::new(0),
        }
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KvStore for DelayedVisibilityStore {
    fn backend_name(&self) -> &'static str {
        "delayed"
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        if key == self.key {
            let seen = self.exists_calls.fetch_add(1, Ordering::SeqCst);
            if seen < self.hidden_reads {
                return Ok(false);
            }
        }
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> KvResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &[u8], options: Option<&WriteOptions>) -> KvResult<()> {
        self.inner.put(key, value, options).await
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        self.inner.delete(key).await
    }

    async fn new_lock(
        &self,
        key: &str,
        options: Option<&LockOptions>,
    ) -> KvResult<Box<dyn Locker>> {
        self.inner.new_lock(key, options).await
    }

    async fn watch(&self, key: &str) -> KvResult<WatchStream> {
        self.inner.watch(key).await
    }
}

/// Backend that slows every data operation and records how many overlap per key
pub struct OverlapTrackingStore {
    inner: MemoryStore,
    op_delay: Duration,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: Mutex<HashMap<String, usize>>,
}

impl OverlapTrackingStore {
    pub fn new(inner: MemoryStore, op_delay: Duration) -> Self {
        Self {
            inner,
            op_delay,
            in_flight: Mutex::new(HashMap::new()),
            max_in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Highest number of concurrent operations observed on `key`
    pub fn max_overlap(&self, key: &str) -> usize {
        self.max_in_flight.lock().get(key).copied().unwrap_or(0)
    }

    async fn tracked<T, F>(&self, key: &str, op: F) -> KvResult<T>
    where
        F: std::future::Future<Output = KvResult<T>>,
    {
        {
            let mut in_flight = self.in_flight.lock();
            let count = in_flight.entry(key.to_string()).or_insert(0);
            *count += 1;
            let mut max = self.max_in_flight.lock();
            let peak = max.entry(key.to_string()).or_insert(0);
            *peak = (*peak).max(*count);
        }

        tokio::time::sleep(self.op_delay).await;
        let result = op.await;

        if let Some(count) = self.in_flight.lock().get_mut(key) {
            *count -= 1;
        }
        result
    }
}

#[async_trait]
impl KvStore for OverlapTrackingStore {
    fn backend_name(&self) -> &'static str {
        "tracking"
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        self.tracked(key, self.inner.exists(key)).await
    }

    async fn get(&self, key: &str) -> KvResult<Bytes> {
        self.tracked(key, self.inner.get(key)).await
    }

    async fn put(&self, key: &str, value: &[u8], options: Option<&WriteOptions>) -> KvResult<()> {
        self.tracked(key, self.inner.put(key, value, options)).await
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        self.tracked(key, self.inner.delete(key)).await
    }

    async fn new_lock(
        &self,
        key: &str,
        options: Option<&LockOptions>,
    ) -> KvResult<Box<dyn Locker>> {
        self.inner.new_lock(key, options).await
    }

    async fn watch(&self, key: &str) -> KvResult<WatchStream> {
        self.inner.watch(key).await
    }
}

/// Backend whose every operation fails as if the connection were down
pub struct UnreachableStore;

fn unreachable() -> KvError {
    KvError::Connection("connection refused".to_string())
}

#[async_trait]
impl KvStore for UnreachableStore {
    fn backend_name(&self) -> &'static str {
        "unreachable"
    }

    async fn exists(&self, _key: &str) -> KvResult<bool> {
        Err(unreachable())
    }

    async fn get(&self, _key: &str) -> KvResult<Bytes> {
        Err(unreachable())
    }

    async fn put(&self, _key: &str, _value: &[u8], _options: Option<&WriteOptions>) -> KvResult<()> {
        Err(unreachable())
    }

    async fn delete(&self, _key: &str) -> KvResult<()> {
        Err(unreachable())
    }

    async fn new_lock(
        &self,
        _key: &str,
        _options: Option<&LockOptions>,
    ) -> KvResult<Box<dyn Locker>> {
        Err(unreachable())
    }

    async fn watch(&self, _key: &str) -> KvResult<WatchStream> {
        Err(unreachable())
    }
}

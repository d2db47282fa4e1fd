//! In-process KV backend with TTLs, locks and watches.
//!
//! Clones share the same underlying state, so several simulated replicas can
//! coordinate through one `MemoryStore` exactly as real replicas coordinate
//! through one Redis instance. Expiry is evaluated lazily against
//! `tokio::time::Instant`, which lets tests drive TTLs with a paused clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::{
    KvError, KvResult, KvStore, LockOptions, Locker, WatchEvent, WatchEventKind, WatchStream,
    WriteOptions,
};

/// Buffered events per watched key before slow subscribers start lagging
const WATCH_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, Copy)]
struct LockEntry {
    owner: u64,
    expires_at: Instant,
}

#[derive(Debug)]
struct Inner {
    entries: DashMap<String, Entry>,
    locks: Mutex<HashMap<String, LockEntry>>,
    lock_released: Notify,
    watchers: DashMap<String, broadcast::Sender<WatchEvent>>,
    next_lock_id: AtomicU64,
}

/// In-memory [`KvStore`]
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                locks: Mutex::new(HashMap::new()),
                lock_released: Notify::new(),
                watchers: DashMap::new(),
                next_lock_id: AtomicU64::new(1),
            }),
        }
    }

    /// Number of live (unexpired) keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// Whether the store holds no live keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a lock on `key` is currently held and unexpired
    pub fn is_locked(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .locks
            .lock()
            .get(key)
            .is_some_and(|held| held.expires_at > now)
    }

    /// Remaining TTL of `key`, if it exists and has one
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.inner
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn load(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        match self.inner.entries.get(key) {
            None => return None,
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => {}
        }

        if self
            .inner
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            trace!(key = %key, "Key expired");
            self.publish(key, WatchEventKind::Expire, None);
        }
        None
    }

    fn publish(&self, key: &str, kind: WatchEventKind, value: Option<Bytes>) {
        if let Some(sender) = self.inner.watchers.get(key) {
            // No receivers is fine: the watch was dropped.
            let _ = sender.send(WatchEvent {
                key: key.to_string(),
                kind,
                value,
            });
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        Ok(self.load(key).is_some())
    }

    async fn get(&self, key: &str) -> KvResult<Bytes> {
        self.load(key)
            .ok_or_else(|| KvError::KeyNotFound(key.to_string()))
    }

    async fn put(&self, key: &str, value: &[u8], options: Option<&WriteOptions>) -> KvResult<()> {
        let ttl = options.and_then(|o| o.ttl);
        let value = Bytes::copy_from_slice(value);

        self.inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );

        trace!(
            key = %key,
            size = value.len(),
            ttl_secs = ttl.map(|t| t.as_secs()),
            "Stored key"
        );
        self.publish(key, WatchEventKind::Put, Some(value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        let now = Instant::now();
        if self
            .inner
            .entries
            .remove_if(key, |_, entry| !entry.is_expired(now))
            .is_none()
        {
            // Drop a lapsed entry so it does not linger
            self.inner
                .entries
                .remove_if(key, |_, entry| entry.is_expired(now));
            return Err(KvError::KeyNotFound(key.to_string()));
        }

        trace!(key = %key, "Deleted key");
        self.publish(key, WatchEventKind::Delete, None);
        Ok(())
    }

    async fn new_lock(
        &self,
        key: &str,
        options: Option<&LockOptions>,
    ) -> KvResult<Box<dyn Locker>> {
        let ttl = options.cloned().unwrap_or_default().effective_ttl();
        let id = self.inner.next_lock_id.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(MemoryLocker {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            id,
            ttl,
        }))
    }

    async fn watch(&self, key: &str) -> KvResult<WatchStream> {
        let receiver = self
            .inner
            .watchers
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(WATCH_CHANNEL_CAPACITY).0)
            .subscribe();

        debug!(key = %key, "Opened watch");

        let key = key.to_string();
        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let key = key.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) => return Some((event, receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(key = %key, skipped, "Watch subscriber lagged, events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

/// Lock handle issued by [`MemoryStore`]
struct MemoryLocker {
    inner: Arc<Inner>,
    key: String,
    id: u64,
    ttl: Duration,
}

#[async_trait]
impl Locker for MemoryLocker {
    async fn lock(&self) -> KvResult<()> {
        loop {
            // Registered before the check so a release in between is not missed.
            let released = self.inner.lock_released.notified();

            let wait = {
                let mut locks = self.inner.locks.lock();
                let now = Instant::now();
                match locks.get(&self.key) {
                    Some(held) if held.owner == self.id && held.expires_at > now => {
                        return Err(KvError::Lock {
                            key: self.key.clone(),
                            message: "already held by this locker".to_string(),
                        });
                    }
                    Some(held) if held.expires_at > now => held.expires_at - now,
                    _ => {
                        locks.insert(
                            self.key.clone(),
                            LockEntry {
                                owner: self.id,
                                expires_at: now + self.ttl,
                            },
                        );
                        return Ok(());
                    }
                }
            };

            trace!(lock = %self.key, wait_ms = wait.as_millis() as u64, "Waiting for lock");
            tokio::select! {
                _ = released => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn unlock(&self) -> KvResult<()> {
        {
            let mut locks = self.inner.locks.lock();
            match locks.get(&self.key) {
                Some(held) if held.owner == self.id => {
                    locks.remove(&self.key);
                }
                _ => return Err(KvError::LockNotHeld(self.key.clone())),
            }
        }

        self.inner.lock_released.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LockGuard;

    #[tokio::test]
    async fn test_put_get_exists_delete() {
        let store = MemoryStore::new();

        assert!(!store.exists("k").await.unwrap());
        assert!(store.get("k").await.unwrap_err().is_not_found());

        store.put("k", b"v1", None).await.unwrap();
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Bytes::from_static(b"v1"));

        store.put("k", b"v2", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Bytes::from_static(b"v2"));

        store.delete("k").await.unwrap();
        assert!(!store.exists("k").await.unwrap());
        assert!(store.delete("k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_empty_value_is_not_absent() {
        let store = MemoryStore::new();

        store.put("empty", b"", None).await.unwrap();
        assert!(store.exists("empty").await.unwrap());
        assert!(store.get("empty").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();

        store
            .put("k", b"v", Some(&WriteOptions::with_ttl(Duration::from_secs(10))))
            .await
            .unwrap();
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!store.exists("k").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewrite_refreshes_ttl() {
        let store = MemoryStore::new();
        let options = WriteOptions::with_ttl(Duration::from_secs(10));

        store.put("k", b"v", Some(&options)).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        store.put("k", b"v", Some(&options)).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;

        assert!(store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_excludes_second_locker() {
        let store = MemoryStore::new();

        let first = store.new_lock("res_lock", None).await.unwrap();
        let second = store.new_lock("res_lock", None).await.unwrap();

        first.lock().await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), second.lock()).await;
        assert!(blocked.is_err());

        first.unlock().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), second.lock())
            .await
            .expect("second locker should acquire after release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_locks_are_per_key() {
        let store = MemoryStore::new();

        let a = store.new_lock("a_lock", None).await.unwrap();
        let b = store.new_lock("b_lock", None).await.unwrap();

        a.lock().await.unwrap();
        tokio::time::timeout(Duration::from_millis(50), b.lock())
            .await
            .expect("unrelated keys must not contend")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_lapses_after_ttl() {
        let store = MemoryStore::new();
        let options = LockOptions::with_ttl(Duration::from_secs(5));

        let crashed = store.new_lock("res_lock", Some(&options)).await.unwrap();
        crashed.lock().await.unwrap();

        let start = Instant::now();
        let survivor = store.new_lock("res_lock", Some(&options)).await.unwrap();
        survivor.lock().await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(5));
        // The lapsed holder no longer owns the lock.
        assert!(matches!(
            crashed.unlock().await,
            Err(KvError::LockNotHeld(_))
        ));
    }

    #[tokio::test]
    async fn test_unlock_without_lock_fails() {
        let store = MemoryStore::new();
        let locker = store.new_lock("res_lock", None).await.unwrap();

        assert!(matches!(locker.unlock().await, Err(KvError::LockNotHeld(_))));
    }

    #[tokio::test]
    async fn test_watch_receives_changes() {
        let store = MemoryStore::new();
        let mut watch = store.watch("certs").await.unwrap();

        store.put("certs", b"[]", None).await.unwrap();
        store.put("other", b"x", None).await.unwrap();
        store.delete("certs").await.unwrap();

        let first = watch.next().await.unwrap();
        assert_eq!(first.kind, WatchEventKind::Put);
        assert_eq!(first.key, "certs");
        assert_eq!(first.value, Some(Bytes::from_static(b"[]")));

        let second = watch.next().await.unwrap();
        assert_eq!(second.kind, WatchEventKind::Delete);
        assert_eq!(second.value, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_expired_key_is_not_found() {
        let store = MemoryStore::new();
        let mut watch = store.watch("k").await.unwrap();

        store
            .put("k", b"old", Some(&WriteOptions::with_ttl(Duration::from_secs(5))))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(store.delete("k").await.unwrap_err().is_not_found());
        assert!(store.inner.entries.is_empty());

        store.put("k", b"new", None).await.unwrap();
        assert!(store.delete("k").await.is_ok());

        let mut kinds = Vec::new();
        for _ in 0..3 {
            kinds.push(watch.next().await.unwrap().kind);
        }
        // The failed delete published nothing
        assert_eq!(
            kinds,
            vec![WatchEventKind::Put, WatchEventKind::Put, WatchEventKind::Delete]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_delete_only_removes_live_entries() {
        let store = MemoryStore::new();

        for _ in 0..200 {
            let writer = store.clone();
            let deleter = store.clone();
            let put = tokio::spawn(async move { writer.put("k", b"v", None).await });
            let delete = tokio::spawn(async move { deleter.delete("k").await });
            put.await.unwrap().unwrap();
            // Either the put landed first and was removed, or the delete saw nothing
            match delete.await.unwrap() {
                Ok(()) => assert!(!store.exists("k").await.unwrap()),
                Err(e) => {
                    assert!(e.is_not_found());
                    assert!(store.exists("k").await.unwrap());
                    store.delete("k").await.unwrap();
                }
            }
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_watch_outlives_lock_scope() {
        let store = MemoryStore::new();

        let guard = LockGuard::acquire(&store, "certs_lock", None).await.unwrap();
        let mut watch = store.watch("certs").await.unwrap();
        guard.release().await;

        store.put("certs", b"[1]", None).await.unwrap();
        let event = watch.next().await.unwrap();
        assert_eq!(event.kind, WatchEventKind::Put);
    }
}

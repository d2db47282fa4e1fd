//! Scoped distributed lock acquisition

use tracing::{trace, warn};

use crate::{KvResult, KvStore, LockOptions, Locker};

/// A held distributed lock that is released when the guard goes away
///
/// Call [`LockGuard::release`] on the normal path so the unlock completes
/// before the caller continues. If the guard is dropped while still held
/// (early return, panic, cancelled task) the unlock is spawned onto the
/// current tokio runtime; outside a runtime the lock lapses by its TTL.
pub struct LockGuard {
    key: String,
    locker: Option<Box<dyn Locker>>,
}

impl LockGuard {
    /// Create a lock for `key` on `store` and block until it is held
    pub async fn acquire(
        store: &dyn KvStore,
        key: &str,
        options: Option<&LockOptions>,
    ) -> KvResult<Self> {
        let locker = store.new_lock(key, options).await?;
        locker.lock().await?;

        trace!(lock = %key, backend = store.backend_name(), "Acquired distributed lock");

        Ok(Self {
            key: key.to_string(),
            locker: Some(locker),
        })
    }

    /// Release the lock now
    ///
    /// Unlock failures are logged, not returned: the lock lapses by TTL and
    /// the operation it guarded has already completed.
    pub async fn release(mut self) {
        if let Some(locker) = self.locker.take() {
            match locker.unlock().await {
                Ok(()) => trace!(lock = %self.key, "Released distributed lock"),
                Err(e) => warn!(lock = %self.key, error = %e, "Failed to release distributed lock"),
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(locker) = self.locker.take() else {
            return;
        };

        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                trace!(lock = %key, "Lock guard dropped while held, releasing in background");
                handle.spawn(async move {
                    if let Err(e) = locker.unlock().await {
                        warn!(lock = %key, error = %e, "Background lock release failed");
                    }
                });
            }
            Err(_) => {
                warn!(
                    lock = %key,
                    "Lock guard dropped outside a runtime, lock will lapse by TTL"
                );
            }
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("held", &self.locker.is_some())
            .finish()
    }
}

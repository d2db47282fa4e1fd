//! Redis KV backend
//!
//! Shared by every replica in a deployment. Plain keys map to Redis strings,
//! locks are `SET NX PX` leases with a random owner token released through a
//! compare-and-delete script, and watches ride on keyspace notifications.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{
    KvError, KvResult, KvStore, LockOptions, Locker, WatchEvent, WatchEventKind, WatchStream,
    WriteOptions,
};

/// Pause between attempts while another owner holds a lock
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Deletes the lock only if it still carries our owner token
const UNLOCK_SCRIPT_SRC: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed [`KvStore`]
#[derive(Clone)]
pub struct RedisStore {
    /// Client kept for opening pub/sub connections
    client: redis::Client,
    /// Multiplexed connection manager (handles reconnection)
    connection: ConnectionManager,
    /// Logical database, needed for keyspace channel names
    database: i64,
}

impl RedisStore {
    /// Connect to Redis at `endpoint` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(endpoint: &str, connect_timeout: Duration) -> KvResult<Self> {
        let client = redis::Client::open(endpoint)?;
        let database = client.get_connection_info().redis.db;

        let connection = tokio::time::timeout(connect_timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| {
                KvError::Connection(format!(
                    "timed out after {}ms connecting to {}",
                    connect_timeout.as_millis(),
                    endpoint
                ))
            })??;

        debug!(database, "Redis KV backend connected");

        Ok(Self {
            client,
            connection,
            database,
        })
    }

    fn keyspace_channel(&self, key: &str) -> String {
        keyspace_channel(self.database, key)
    }
}

fn keyspace_channel(database: i64, key: &str) -> String {
    format!("__keyspace@{}__:{}", database, key)
}

fn event_kind(operation: &str) -> Option<WatchEventKind> {
    match operation {
        "set" => Some(WatchEventKind::Put),
        "del" => Some(WatchEventKind::Delete),
        "expired" | "evicted" => Some(WatchEventKind::Expire),
        _ => None,
    }
}

#[async_trait]
impl KvStore for RedisStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn get(&self, key: &str) -> KvResult<Bytes> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        value
            .map(Bytes::from)
            .ok_or_else(|| KvError::KeyNotFound(key.to_string()))
    }

    async fn put(&self, key: &str, value: &[u8], options: Option<&WriteOptions>) -> KvResult<()> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = options.and_then(|o| o.ttl) {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }

        let _: () = cmd.query_async(&mut conn).await?;
        trace!(key = %key, size = value.len(), "Stored key in Redis");
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.del(key).await?;
        if removed == 0 {
            return Err(KvError::KeyNotFound(key.to_string()));
        }
        Ok(())
    }

    async fn new_lock(
        &self,
        key: &str,
        options: Option<&LockOptions>,
    ) -> KvResult<Box<dyn Locker>> {
        Ok(Box::new(RedisLocker {
            connection: self.connection.clone(),
            key: key.to_string(),
            token: Uuid::new_v4().to_string(),
            ttl: options.cloned().unwrap_or_default().effective_ttl(),
        }))
    }

    async fn watch(&self, key: &str) -> KvResult<WatchStream> {
        let channel = self.keyspace_channel(key);
        let watch_error = |e: redis::RedisError| KvError::Watch {
            key: key.to_string(),
            message: e.to_string(),
        };

        // Notifications are off by default; enabling them may be forbidden on
        // managed Redis, in which case the operator has to configure it.
        let mut conn = self.connection.clone();
        let enabled: Result<(), redis::RedisError> = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg("KA")
            .query_async(&mut conn)
            .await;
        if let Err(e) = enabled {
            warn!(error = %e, "Could not enable Redis keyspace notifications");
        }

        let mut pubsub = self.client.get_async_pubsub().await.map_err(watch_error)?;
        pubsub.subscribe(&channel).await.map_err(watch_error)?;

        debug!(key = %key, channel = %channel, "Opened Redis watch");

        let key = key.to_string();
        let connection = self.connection.clone();
        let stream = pubsub.into_on_message().filter_map(move |message| {
            let key = key.clone();
            let mut conn = connection.clone();
            async move {
                let operation: String = message.get_payload().ok()?;
                let kind = event_kind(&operation)?;
                let value = if kind == WatchEventKind::Put {
                    let current: Option<Vec<u8>> = conn.get(&key).await.ok()?;
                    current.map(Bytes::from)
                } else {
                    None
                };
                Some(WatchEvent { key, kind, value })
            }
        });

        Ok(stream.boxed())
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("database", &self.database)
            .finish()
    }
}

/// Lock handle issued by [`RedisStore`]
struct RedisLocker {
    connection: ConnectionManager,
    key: String,
    /// Random owner token so only the holder can release
    token: String,
    ttl: Duration,
}

#[async_trait]
impl Locker for RedisLocker {
    async fn lock(&self) -> KvResult<()> {
        let mut conn = self.connection.clone();
        loop {
            // If this future is dropped while SET is in flight the server may
            // already hold our token, so release it in the background.
            let attempt = CancelGuard::new({
                let connection = self.connection.clone();
                let key = self.key.clone();
                let token = self.token.clone();
                move || release_in_background(connection, key, token)
            });

            let acquired: KvResult<Option<String>> = redis::cmd("SET")
                .arg(&self.key)
                .arg(&self.token)
                .arg("NX")
                .arg("PX")
                .arg(self.ttl.as_millis() as u64)
                .query_async(&mut conn)
                .await
                .map_err(|e| KvError::Lock {
                    key: self.key.clone(),
                    message: e.to_string(),
                });
            attempt.disarm();
            let acquired = acquired?;

            if acquired.is_some() {
                return Ok(());
            }

            trace!(lock = %self.key, "Lock held elsewhere, retrying");
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    async fn unlock(&self) -> KvResult<()> {
        let mut conn = self.connection.clone();
        let removed: i64 = Script::new(UNLOCK_SCRIPT_SRC)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await?;

        if removed == 0 {
            return Err(KvError::LockNotHeld(self.key.clone()));
        }
        Ok(())
    }
}

/// Runs `on_cancel` when dropped before [`CancelGuard::disarm`]
struct CancelGuard<F: FnOnce()> {
    on_cancel: Option<F>,
}

impl<F: FnOnce()> CancelGuard<F> {
    fn new(on_cancel: F) -> Self {
        Self {
            on_cancel: Some(on_cancel),
        }
    }

    fn disarm(mut self) {
        self.on_cancel = None;
    }
}

impl<F: FnOnce()> Drop for CancelGuard<F> {
    fn drop(&mut self) {
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
    }
}

/// Compare-and-delete `key` on a spawned task; outside a runtime it lapses by TTL
fn release_in_background(connection: ConnectionManager, key: String, token: String) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        warn!(lock = %key, "Lock acquisition cancelled outside a runtime, lock will lapse by TTL");
        return;
    };

    debug!(lock = %key, "Lock acquisition cancelled, releasing any lease taken");
    handle.spawn(async move {
        let mut conn = connection;
        let released: redis::RedisResult<i64> = Script::new(UNLOCK_SCRIPT_SRC)
            .key(&key)
            .arg(&token)
            .invoke_async(&mut conn)
            .await;
        if let Err(e) = released {
            warn!(lock = %key, error = %e, "Failed to release cancelled lock acquisition");
        }
    });
}

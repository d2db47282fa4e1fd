//! Backend and identity wiring from configuration

use std::sync::Arc;

use tracing::info;

use sentinel_common::ReplicaId;
use sentinel_config::{BackendKind, ClusterConfig};
use sentinel_kv::{KvStore, MemoryStore};

use crate::error::{AcmeError, AcmeResult};

/// Open the KV backend named by `config`
pub async fn connect_backend(config: &ClusterConfig) -> AcmeResult<Arc<dyn KvStore>> {
    match config.backend.kind {
        BackendKind::Memory => {
            info!("Using in-process memory backend; state is not shared between replicas");
            Ok(Arc::new(MemoryStore::new()))
        }
        BackendKind::Redis => connect_redis(config).await,
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(config: &ClusterConfig) -> AcmeResult<Arc<dyn KvStore>> {
    let endpoint = config.backend.endpoint.as_deref().ok_or_else(|| {
        sentinel_kv::KvError::Connection("redis backend requires an endpoint".to_string())
    })?;

    let store = sentinel_kv::RedisStore::connect(endpoint, config.backend.connect_timeout()).await?;
    info!(endpoint = %endpoint, "Connected to redis backend");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_config: &ClusterConfig) -> AcmeResult<Arc<dyn KvStore>> {
    Err(sentinel_kv::KvError::Connection(
        "redis backend requested but sentinel-acme was built without the 'redis' feature"
            .to_string(),
    )
    .into())
}

/// Identity this replica uses for challenge leadership
///
/// The configured `replica-id` wins; otherwise the machine hostname.
pub fn resolve_replica_id(config: &ClusterConfig) -> AcmeResult<ReplicaId> {
    if let Some(id) = config.replica_id.as_deref() {
        return Ok(ReplicaId::new(id));
    }

    ReplicaId::from_hostname().map_err(|e| AcmeError::Identity(e.to_string()))
}

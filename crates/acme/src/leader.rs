//! HTTP challenge leader election
//!
//! Exactly one replica may present HTTP-01 challenges at a time. The leader is
//! whichever replica's identity is stored under `http_challenge_main`; the
//! record carries a 15 minute TTL that the leader refreshes on every check.
//! A crashed leader is detected only by that TTL lapsing, after which the next
//! replica to check claims the record.
//!
//! Checks are serialized across replicas by `http_challenge_main_lock`.
//!
//! There is no fencing token: a leader whose record lapses while it is still
//! writing can overlap with the newly elected one without either noticing.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace};

use sentinel_common::ReplicaId;
use sentinel_kv::{KvStore, LockGuard, LockOptions, WriteOptions};

use crate::error::{AcmeError, AcmeResult};
use crate::keys::{self, CHALLENGE_MAIN_KEY};

/// Lifetime of the leadership record between renewals
pub const CHALLENGE_MAIN_TTL: Duration = Duration::from_secs(15 * 60);

/// Outcome of a leadership check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leadership {
    /// This replica holds (or just claimed) leadership
    Leader,
    /// Another replica holds leadership
    Follower { leader: String },
}

impl Leadership {
    pub fn is_leader(&self) -> bool {
        matches!(self, Leadership::Leader)
    }
}

/// Leadership protocol for one replica
pub struct LeaderElection {
    store: Arc<dyn KvStore>,
    replica: ReplicaId,
    lock_options: LockOptions,
}

impl LeaderElection {
    pub fn new(store: Arc<dyn KvStore>, replica: ReplicaId) -> Self {
        Self {
            store,
            replica,
            lock_options: LockOptions::default(),
        }
    }

    /// Override the lease of the leadership lock
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_options = LockOptions::with_ttl(ttl);
        self
    }

    /// Identity this replica writes into the leadership record
    pub fn replica(&self) -> &ReplicaId {
        &self.replica
    }

    /// Claim, renew or observe challenge leadership
    ///
    /// Claims the record when it is absent and renews it when it already names
    /// this replica; both refresh the TTL. Otherwise reports the current
    /// holder without touching the record.
    pub async fn is_challenge_main(&self) -> AcmeResult<Leadership> {
        let lock_key = keys::lock_key(CHALLENGE_MAIN_KEY);
        let guard = LockGuard::acquire(self.store.as_ref(), &lock_key, Some(&self.lock_options))
            .await
            .map_err(|source| AcmeError::LockAcquisition {
                key: lock_key,
                source,
            })?;

        let result = self.claim_or_renew().await;
        guard.release().await;
        result
    }

    async fn claim_or_renew(&self) -> AcmeResult<Leadership> {
        match self.read_leader().await? {
            None => {
                self.write_record().await?;
                info!(replica = %self.replica, "Claimed HTTP challenge leadership");
                Ok(Leadership::Leader)
            }
            Some(leader) if leader.as_bytes() == self.replica.as_bytes() => {
                self.write_record().await?;
                debug!(replica = %self.replica, "Renewed HTTP challenge leadership");
                Ok(Leadership::Leader)
            }
            Some(leader) => {
                trace!(
                    replica = %self.replica,
                    leader = %leader,
                    "Another replica holds HTTP challenge leadership"
                );
                Ok(Leadership::Follower { leader })
            }
        }
    }

    async fn write_record(&self) -> AcmeResult<()> {
        let options = WriteOptions::with_ttl(CHALLENGE_MAIN_TTL);
        self.store
            .put(CHALLENGE_MAIN_KEY, self.replica.as_bytes(), Some(&options))
            .await?;
        Ok(())
    }

    async fn read_leader(&self) -> AcmeResult<Option<String>> {
        if !self.store.exists(CHALLENGE_MAIN_KEY).await? {
            return Ok(None);
        }

        match self.store.get(CHALLENGE_MAIN_KEY).await {
            Ok(value) => Ok(Some(String::from_utf8_lossy(&value).into_owned())),
            // Lapsed between exists and get
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Current leader without claiming or renewing
    pub async fn current_leader(&self) -> AcmeResult<Option<String>> {
        self.read_leader().await
    }
}

impl std::fmt::Debug for LeaderElection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElection")
            .field("replica", &self.replica)
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_kv::MemoryStore;

    fn election(memory: &MemoryStore, replica: &str) -> LeaderElection {
        LeaderElection::new(Arc::new(memory.clone()), ReplicaId::new(replica))
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_writes_identity_with_ttl() {
        let memory = MemoryStore::new();
        let a = election(&memory, "edge-1");

        assert_eq!(a.is_challenge_main().await.unwrap(), Leadership::Leader);
        assert_eq!(
            memory.get(CHALLENGE_MAIN_KEY).await.unwrap().as_ref(),
            b"edge-1"
        );
        assert_eq!(memory.ttl(CHALLENGE_MAIN_KEY), Some(CHALLENGE_MAIN_TTL));
        assert!(!memory.is_locked("http_challenge_main_lock"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_refreshes_ttl() {
        let memory = MemoryStore::new();
        let a = election(&memory, "edge-1");

        a.is_challenge_main().await.unwrap();
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(
            memory.ttl(CHALLENGE_MAIN_KEY),
            Some(CHALLENGE_MAIN_TTL - Duration::from_secs(600))
        );

        assert!(a.is_challenge_main().await.unwrap().is_leader());
        assert_eq!(memory.ttl(CHALLENGE_MAIN_KEY), Some(CHALLENGE_MAIN_TTL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_does_not_mutate() {
        let memory = MemoryStore::new();
        let a = election(&memory, "edge-1");
        let b = election(&memory, "edge-2");

        a.is_challenge_main().await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;

        assert_eq!(
            b.is_challenge_main().await.unwrap(),
            Leadership::Follower {
                leader: "edge-1".to_string()
            }
        );
        assert_eq!(
            memory.ttl(CHALLENGE_MAIN_KEY),
            Some(CHALLENGE_MAIN_TTL - Duration::from_secs(60))
        );
        assert_eq!(b.current_leader().await.unwrap().as_deref(), Some("edge-1"));
    }
}

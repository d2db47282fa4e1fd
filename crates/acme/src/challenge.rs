//! Clustered HTTP-01 challenge handling
//!
//! The ACME client asks the coordinator to present a challenge; the
//! coordinator checks challenge leadership, then writes the key authorization
//! to the shared backend. Any replica may later receive the CA's validation
//! probe for `/.well-known/acme-challenge/<token>` and answers it from the
//! backend, retrying while the leader's write is not yet visible.
//!
//! # Exclusion
//!
//! Two layers are held together:
//!
//! - a local read/write lock: `present`/`clean_up` write, lookups read
//! - the backend lock `{domain}_{token}_lock` around every token access
//!
//! # Responses
//!
//! [`ChallengeCoordinator::serve_http`] answers `200` with the raw key
//! authorization or `404`. Backend failures during a lookup are retried and
//! then reported as `404`, never as a server error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Method, Request, Response, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use sentinel_common::{retry_notify, ExponentialBackoff, ReplicaId};
use sentinel_kv::{KvStore, LockGuard, LockOptions};

use crate::error::{AcmeError, AcmeResult};
use crate::keys;
use crate::leader::{LeaderElection, Leadership};
use crate::metrics::AcmeMetrics;

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// How long the ACME client waits for a presented challenge to be servable
pub const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(60);

/// How often the ACME client polls while waiting
pub const CHALLENGE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Challenge provider contract driven by an ACME client
#[async_trait]
pub trait ChallengeProvider: Send + Sync {
    /// Make `key_auth` servable for `token` on `domain`
    async fn present(&self, domain: &str, token: &str, key_auth: &str) -> AcmeResult<()>;

    /// Remove the challenge once validation finished; succeeds if already gone
    async fn clean_up(&self, domain: &str, token: &str, key_auth: &str) -> AcmeResult<()>;

    /// Overall timeout and poll interval for validation
    fn timeout(&self) -> (Duration, Duration);
}

/// HTTP-01 challenge coordinator for one replica
pub struct ChallengeCoordinator {
    store: Arc<dyn KvStore>,
    election: LeaderElection,
    local: RwLock<()>,
    lock_options: LockOptions,
    lookup_backoff: ExponentialBackoff,
    metrics: Option<AcmeMetrics>,
}

impl ChallengeCoordinator {
    /// Create a coordinator on `store` identified as `replica`
    pub fn new(store: Arc<dyn KvStore>, replica: ReplicaId) -> Self {
        info!(
            replica = %replica,
            backend = store.backend_name(),
            "Created clustered HTTP-01 challenge coordinator"
        );

        Self {
            election: LeaderElection::new(Arc::clone(&store), replica),
            store,
            local: RwLock::new(()),
            lock_options: LockOptions::default(),
            lookup_backoff: default_lookup_backoff(),
            metrics: None,
        }
    }

    /// Override the lease of token and leadership locks
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_options = LockOptions::with_ttl(ttl);
        self.election = self.election.with_lock_ttl(ttl);
        self
    }

    /// Override the retry schedule of challenge lookups
    ///
    /// The lookup still stops at [`CHALLENGE_TIMEOUT`] whatever the policy's
    /// own elapsed ceiling is.
    pub fn with_lookup_backoff(mut self, policy: ExponentialBackoff) -> Self {
        self.lookup_backoff = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: AcmeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Identity of this replica
    pub fn replica(&self) -> &ReplicaId {
        self.election.replica()
    }

    /// Replica currently holding challenge leadership, if any
    pub async fn leader(&self) -> AcmeResult<Option<String>> {
        self.election.current_leader().await
    }

    async fn lock_token(&self, key: &str) -> AcmeResult<LockGuard> {
        let lock_key = keys::lock_key(key);
        LockGuard::acquire(self.store.as_ref(), &lock_key, Some(&self.lock_options))
            .await
            .map_err(|source| AcmeError::LockAcquisition {
                key: lock_key,
                source,
            })
    }

    async fn check_leadership(&self) -> AcmeResult<()> {
        let leadership = match self.election.is_challenge_main().await {
            Ok(leadership) => leadership,
            Err(e) => {
                self.record_leadership("error");
                return Err(e);
            }
        };

        match leadership {
            Leadership::Leader => {
                self.record_leadership("leader");
                Ok(())
            }
            Leadership::Follower { leader } => {
                self.record_leadership("follower");
                Err(AcmeError::NotLeader {
                    replica: self.replica().to_string(),
                    leader,
                })
            }
        }
    }

    async fn present_token(&self, domain: &str, token: &str, key_auth: &str) -> AcmeResult<()> {
        let _local = self.local.write().await;

        self.check_leadership().await?;

        let key = keys::token_key(domain, token);
        let guard = self.lock_token(&key).await?;
        let result = self.store.put(&key, key_auth.as_bytes(), None).await;
        guard.release().await;

        result?;
        Ok(())
    }

    async fn remove_token(&self, domain: &str, token: &str) -> AcmeResult<bool> {
        let _local = self.local.write().await;

        let key = keys::token_key(domain, token);
        let guard = self.lock_token(&key).await?;
        let result = self.delete_if_present(&key).await;
        guard.release().await;
        result
    }

    async fn delete_if_present(&self, key: &str) -> AcmeResult<bool> {
        if !self.store.exists(key).await? {
            return Ok(false);
        }
        self.store.delete(key).await?;
        Ok(true)
    }

    /// Fetch the key authorization for `token` on `domain`
    ///
    /// Retries on the lookup backoff while the token is absent or the backend
    /// fails, and stops once the elapsed ceiling is reached. Returns empty
    /// bytes when nothing was found in time.
    pub async fn get_token_value(&self, token: &str, domain: &str) -> Bytes {
        debug!(domain = %domain, token = %token, "Retrieving ACME challenge");

        // A caller-supplied policy may shorten the lookup but never extend it
        let ceiling = self
            .lookup_backoff
            .max_elapsed_time
            .map_or(CHALLENGE_TIMEOUT, |limit| limit.min(CHALLENGE_TIMEOUT));

        let lookup = retry_notify(
            &self.lookup_backoff,
            || self.lookup_once(domain, token),
            |err, delay| {
                if let Some(metrics) = &self.metrics {
                    metrics.record_lookup_retry();
                }
                warn!(
                    domain = %domain,
                    token = %token,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "Error getting challenge for token, retrying"
                );
            },
        );

        let value = match tokio::time::timeout(ceiling, lookup).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                error!(
                    domain = %domain,
                    token = %token,
                    error = %e,
                    "Cannot retrieve the ACME challenge"
                );
                Bytes::new()
            }
            Err(_) => {
                error!(
                    domain = %domain,
                    token = %token,
                    timeout_secs = ceiling.as_secs(),
                    "Timed out retrieving the ACME challenge"
                );
                Bytes::new()
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_lookup(!value.is_empty());
        }
        value
    }

    async fn lookup_once(&self, domain: &str, token: &str) -> AcmeResult<Bytes> {
        let _local = self.local.read().await;

        let key = keys::token_key(domain, token);
        let guard = self.lock_token(&key).await?;
        let result = self.read_token(&key, domain, token).await;
        guard.release().await;
        result
    }

    async fn read_token(&self, key: &str, domain: &str, token: &str) -> AcmeResult<Bytes> {
        if !self.store.exists(key).await? {
            return Err(AcmeError::ChallengeNotFound {
                domain: domain.to_string(),
                token: token.to_string(),
            });
        }
        Ok(self.store.get(key).await?)
    }

    /// Answer an ACME HTTP-01 validation request
    ///
    /// Responds `200` with the key authorization when the path is a challenge
    /// path and the token is found for the request's host, `404` otherwise.
    pub async fn serve_http<B>(&self, request: &Request<B>) -> Response<Bytes> {
        if request.method() != Method::GET {
            return not_found();
        }

        let Some(token) = Self::extract_token(request.uri().path()) else {
            debug!(path = %request.uri().path(), "Not an ACME challenge path");
            return not_found();
        };

        let host = request
            .headers()
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| request.uri().authority().map(|a| a.as_str()))
            .unwrap_or_default();
        let domain = domain_from_host(host);

        let value = self.get_token_value(token, domain).await;
        if value.is_empty() {
            return not_found();
        }

        let mut response = Response::new(value);
        *response.status_mut() = StatusCode::OK;
        response
    }

    /// Token from an HTTP-01 challenge path (one trailing slash allowed)
    pub fn extract_token(path: &str) -> Option<&str> {
        let rest = path.strip_prefix(ACME_CHALLENGE_PREFIX)?;
        let token = rest.strip_suffix('/').unwrap_or(rest);
        if token.is_empty() || token.contains('/') {
            return None;
        }
        Some(token)
    }

    fn record_leadership(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_leadership(outcome);
        }
    }

    fn record_operation(&self, operation: &str, result: &AcmeResult<()>) {
        if let Some(metrics) = &self.metrics {
            let label = match result {
                Ok(()) => "ok",
                Err(e) if e.is_not_leader() => "not_leader",
                Err(_) => "error",
            };
            metrics.record_operation(operation, label);
        }
    }
}

#[async_trait]
impl ChallengeProvider for ChallengeCoordinator {
    async fn present(&self, domain: &str, token: &str, key_auth: &str) -> AcmeResult<()> {
        info!(domain = %domain, token = %token, "Presenting ACME HTTP-01 challenge");

        let result = self.present_token(domain, token, key_auth).await;
        self.record_operation("present", &result);

        match &result {
            Ok(()) => debug!(domain = %domain, token = %token, "Challenge token stored"),
            Err(e) if e.is_not_leader() => {
                info!(domain = %domain, token = %token, reason = %e, "Not presenting challenge")
            }
            Err(e) => warn!(domain = %domain, token = %token, error = %e, "Failed to present challenge"),
        }
        result
    }

    async fn clean_up(&self, domain: &str, token: &str, _key_auth: &str) -> AcmeResult<()> {
        let result = self.remove_token(domain, token).await;

        let result = match result {
            Ok(true) => {
                debug!(domain = %domain, token = %token, "Removed ACME challenge");
                Ok(())
            }
            Ok(false) => {
                debug!(domain = %domain, token = %token, "ACME challenge already absent");
                Ok(())
            }
            Err(e) => {
                warn!(domain = %domain, token = %token, error = %e, "Failed to clean up challenge");
                Err(e)
            }
        };

        self.record_operation("clean_up", &result);
        result
    }

    fn timeout(&self) -> (Duration, Duration) {
        (CHALLENGE_TIMEOUT, CHALLENGE_POLL_INTERVAL)
    }
}

impl std::fmt::Debug for ChallengeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeCoordinator")
            .field("replica", self.replica())
            .field("backend", &self.store.backend_name())
            .field("lookup_backoff", &self.lookup_backoff)
            .finish()
    }
}

/// Lookup schedule: default exponential backoff capped at the challenge timeout
pub fn default_lookup_backoff() -> ExponentialBackoff {
    ExponentialBackoff::default().with_max_elapsed_time(CHALLENGE_TIMEOUT)
}

/// Host part of a `Host` header, or the header verbatim if it has no port
pub fn domain_from_host(host: &str) -> &str {
    split_host_port(host).map(|(host, _)| host).unwrap_or(host)
}

/// Split `host:port` / `[v6]:port`; `None` when there is no port to strip
fn split_host_port(hostport: &str) -> Option<(&str, &str)> {
    if let Some(rest) = hostport.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = after.strip_prefix(':')?;
        return Some((host, port));
    }

    let (host, port) = hostport.rsplit_once(':')?;
    if host.contains(':') {
        // Bare IPv6 address without brackets
        return None;
    }
    Some((host, port))
}

fn not_found() -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

//! Lock-guarded account and certificate storage
//!
//! Every read and write of a record holds the backend lock `{key}_lock` for
//! its duration, so a reader never observes a record while another replica is
//! replacing it. Locks are per record key: different resolvers, and the
//! account and certificate records of one resolver, never contend.
//!
//! # Keys
//!
//! ```text
//! {resolver}_account            -> Account JSON
//! {resolver}_account_lock
//! {resolver}_certificates       -> [CertAndStore] JSON
//! {resolver}_certificates_lock
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, trace};

use sentinel_kv::{KvStore, LockGuard, LockOptions, WatchStream};

use crate::error::{AcmeError, AcmeResult};
use crate::keys;
use crate::records::{decode_certificates, Account, CertAndStore, StoredData};

/// Account and certificate persistence consumed by the ACME client
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Account for `resolver`, or `None` if none was ever saved
    async fn get_account(&self, resolver: &str) -> AcmeResult<Option<Account>>;

    /// Replace the account for `resolver`
    async fn save_account(&self, resolver: &str, account: &Account) -> AcmeResult<()>;

    /// Certificates for `resolver`; empty if none were ever saved
    async fn get_certificates(&self, resolver: &str) -> AcmeResult<Vec<CertAndStore>>;

    /// Replace the whole certificate list for `resolver`
    async fn save_certificates(
        &self,
        resolver: &str,
        certificates: &[CertAndStore],
    ) -> AcmeResult<()>;
}

/// [`CertificateStore`] backed by a shared [`KvStore`]
#[derive(Clone)]
pub struct KvCertificateStore {
    store: Arc<dyn KvStore>,
    lock_options: LockOptions,
}

impl KvCertificateStore {
    /// Create a record store on `store` with the default lock TTL
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            lock_options: LockOptions::default(),
        }
    }

    /// Override the lease of record locks
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_options = LockOptions::with_ttl(ttl);
        self
    }

    async fn lock(&self, key: &str) -> AcmeResult<LockGuard> {
        let lock_key = keys::lock_key(key);
        LockGuard::acquire(self.store.as_ref(), &lock_key, Some(&self.lock_options))
            .await
            .map_err(|source| AcmeError::LockAcquisition {
                key: lock_key,
                source,
            })
    }

    /// Read raw bytes under `key`'s lock; `None` if the key does not exist
    pub async fn get(&self, key: &str) -> AcmeResult<Option<Bytes>> {
        let guard = self.lock(key).await?;
        let result = self.read(key).await;
        guard.release().await;
        result
    }

    async fn read(&self, key: &str) -> AcmeResult<Option<Bytes>> {
        if !self.store.exists(key).await? {
            trace!(key = %key, "Record not found");
            return Ok(None);
        }

        match self.store.get(key).await {
            Ok(value) => Ok(Some(value)),
            // Lapsed between exists and get
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite `key` with `value` under `key`'s lock
    pub async fn save(&self, key: &str, value: &[u8]) -> AcmeResult<()> {
        let guard = self.lock(key).await?;
        let result = self.store.put(key, value, None).await;
        guard.release().await;

        result?;
        trace!(key = %key, size = value.len(), "Saved record");
        Ok(())
    }

    /// Subscribe to changes of `resolver`'s certificate list
    ///
    /// The lock is held only while the watch is opened. The stream yields raw
    /// events; consumers re-read with [`CertificateStore::get_certificates`].
    pub async fn watch_certificate_changes(&self, resolver: &str) -> AcmeResult<WatchStream> {
        let key = keys::certificates_key(resolver);
        let guard = self.lock(&key).await?;
        let result = self.store.watch(&key).await;
        guard.release().await;

        let stream = result?;
        debug!(resolver = %resolver, key = %key, "Watching certificate changes");
        Ok(stream)
    }

    /// Read the account and certificates for `resolver`
    pub async fn load_stored_data(&self, resolver: &str) -> AcmeResult<StoredData> {
        Ok(StoredData {
            account: self.get_account(resolver).await?,
            certificates: self.get_certificates(resolver).await?,
        })
    }

    /// Write the account (if any) and the certificates for `resolver`
    pub async fn save_stored_data(&self, resolver: &str, data: &StoredData) -> AcmeResult<()> {
        if let Some(account) = &data.account {
            self.save_account(resolver, account).await?;
        }
        self.save_certificates(resolver, &data.certificates).await
    }
}

#[async_trait]
impl CertificateStore for KvCertificateStore {
    async fn get_account(&self, resolver: &str) -> AcmeResult<Option<Account>> {
        let key = keys::account_key(resolver);
        let Some(data) = self.get(&key).await? else {
            debug!(resolver = %resolver, "No stored ACME account");
            return Ok(None);
        };

        let account =
            serde_json::from_slice(&data).map_err(|source| AcmeError::Decode { key, source })?;
        Ok(Some(account))
    }

    async fn save_account(&self, resolver: &str, account: &Account) -> AcmeResult<()> {
        let key = keys::account_key(resolver);
        let data = serde_json::to_vec(account).map_err(|source| AcmeError::Encode {
            key: key.clone(),
            source,
        })?;

        self.save(&key, &data).await?;
        info!(resolver = %resolver, email = %account.email, "Saved ACME account");
        Ok(())
    }

    async fn get_certificates(&self, resolver: &str) -> AcmeResult<Vec<CertAndStore>> {
        let key = keys::certificates_key(resolver);
        let Some(data) = self.get(&key).await? else {
            debug!(resolver = %resolver, "No stored certificates");
            return Ok(Vec::new());
        };

        decode_certificates(&data).map_err(|source| AcmeError::Decode { key, source })
    }

    async fn save_certificates(
        &self,
        resolver: &str,
        certificates: &[CertAndStore],
    ) -> AcmeResult<()> {
        let key = keys::certificates_key(resolver);
        let data = serde_json::to_vec(certificates).map_err(|source| AcmeError::Encode {
            key: key.clone(),
            source,
        })?;

        self.save(&key, &data).await?;
        info!(
            resolver = %resolver,
            count = certificates.len(),
            "Saved ACME certificates"
        );
        Ok(())
    }
}

impl std::fmt::Debug for KvCertificateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvCertificateStore")
            .field("backend", &self.store.backend_name())
            .field("lock_ttl", &self.lock_options.effective_ttl())
            .finish()
    }
}

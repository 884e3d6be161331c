//! [`HashStore`]: the hash-field TTL store seam, and its in-process [`MemoryStore`].
//!
//! The trait mirrors the handful of Redis commands the pipeline relies on
//! (`EXISTS`, `HEXISTS`, `GET`, `HGET`, `SETEX`, `HSETEX`). Each call is
//! atomic on its own; nothing here makes a check-then-set sequence atomic.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use common::CredentialError;
use thiserror::Error;
use tokio::{sync::RwLock, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

/// Errors produced by a [`HashStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or failed mid-operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The key holds a whole value where a hash was expected, or vice versa.
    #[error("wrong kind of value at key {0}")]
    WrongType(String),

    /// A write was attempted with a zero TTL.
    #[error("invalid expire time")]
    InvalidTtl,
}

impl From<StoreError> for CredentialError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::WrongType(_) => CredentialError::Encoding(e.to_string()),
            StoreError::Unavailable(_) | StoreError::InvalidTtl => {
                CredentialError::CacheUnavailable(e.to_string())
            }
        }
    }
}

/// A key-value store with whole-value and per-hash-field expiry.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HashStore: Send + Sync {
    /// Number of live keys among `[key]` (0 or 1).
    async fn exists(&self, key: &str) -> Result<u64, StoreError>;

    /// Whether `field` of the hash at `key` is live.
    async fn hexists(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    /// Whole value at `key`, if live.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Value of `field` in the hash at `key`, if live.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>, StoreError>;

    /// Set the whole value at `key`, expiring after `ttl`. Overwrites any existing value.
    async fn set_ex(&self, key: &str, ttl: Duration, value: Bytes) -> Result<(), StoreError>;

    /// Set `field` of the hash at `key`, expiring after `ttl`. Other fields are untouched.
    async fn hset_ex(
        &self,
        key: &str,
        ttl: Duration,
        field: &str,
        value: Bytes,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct Expiring {
    value: Bytes,
    expires_at: Instant,
}

impl Expiring {
    fn new(value: Bytes, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug)]
enum Entry {
    Value(Expiring),
    Hash(HashMap<String, Expiring>),
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        match self {
            Entry::Value(v) => v.is_live(now),
            Entry::Hash(fields) => fields.values().any(|f| f.is_live(now)),
        }
    }
}

/// In-process [`HashStore`] with lazy expiry.
///
/// Expired entries are invisible to reads immediately and are reclaimed by
/// [`MemoryStore::purge_expired`] (see [`sweep_task`]). Clones share state.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryStore {
    /// Create a new, empty [`MemoryStore`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys holding at least one live value.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    /// Returns `true` if no key holds a live value.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired values and hash fields; returns the number of keys removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, entry| {
            if let Entry::Hash(fields) = entry {
                fields.retain(|_, f| f.is_live(now));
            }
            entry.is_live(now)
        });
        before - map.len()
    }
}

#[async_trait]
impl HashStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        let map = self.inner.read().await;
        Ok(u64::from(map.get(key).is_some_and(|e| e.is_live(now))))
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        Ok(self.hget(key, field).await?.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let now = Instant::now();
        let map = self.inner.read().await;
        match map.get(key) {
            Some(Entry::Value(v)) if v.is_live(now) => Ok(Some(v.value.clone())),
            Some(entry @ Entry::Hash(_)) if entry.is_live(now) => {
                Err(StoreError::WrongType(key.to_owned()))
            }
            _ => Ok(None),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>, StoreError> {
        let now = Instant::now();
        let map = self.inner.read().await;
        match map.get(key) {
            Some(Entry::Hash(fields)) => Ok(fields
                .get(field)
                .filter(|f| f.is_live(now))
                .map(|f| f.value.clone())),
            Some(Entry::Value(v)) if v.is_live(now) => Err(StoreError::WrongType(key.to_owned())),
            _ => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, ttl: Duration, value: Bytes) -> Result<(), StoreError> {
        if ttl.is_zero() {
            return Err(StoreError::InvalidTtl);
        }
        let mut map = self.inner.write().await;
        map.insert(key.to_owned(), Entry::Value(Expiring::new(value, ttl)));
        Ok(())
    }

    async fn hset_ex(
        &self,
        key: &str,
        ttl: Duration,
        field: &str,
        value: Bytes,
    ) -> Result<(), StoreError> {
        if ttl.is_zero() {
            return Err(StoreError::InvalidTtl);
        }
        let now = Instant::now();
        let mut map = self.inner.write().await;
        let entry = map
            .entry(key.to_owned())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        if let Entry::Value(v) = entry {
            if v.is_live(now) {
                return Err(StoreError::WrongType(key.to_owned()));
            }
            *entry = Entry::Hash(HashMap::new());
        }
        if let Entry::Hash(fields) = entry {
            fields.insert(field.to_owned(), Expiring::new(value, ttl));
        }
        Ok(())
    }
}

/// Spawn a background task that purges expired entries every `interval`
/// until `shutdown` is cancelled.
pub fn sweep_task(
    store: MemoryStore,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; nothing can have expired yet.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("store sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let removed = store.purge_expired().await;
                    debug!(removed, "purged expired cache entries");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn initially_empty() {
        let store = MemoryStore::new();
        assert!(store.is_empty().await);
        assert_eq!(store.exists("tenant:token").await.unwrap(), 0);
        assert!(!store.hexists("tenant:credential", "f").await.unwrap());
        assert!(store.get("tenant:token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn whole_value_round_trip() {
        let store = MemoryStore::new();
        store
            .set_ex("tenant:token", TTL, Bytes::from_static(b"a.b.c"))
            .await
            .unwrap();
        assert_eq!(store.exists("tenant:token").await.unwrap(), 1);
        assert_eq!(
            store.get("tenant:token").await.unwrap().unwrap(),
            Bytes::from_static(b"a.b.c")
        );
    }

    #[tokio::test]
    async fn hash_fields_are_independent() {
        let store = MemoryStore::new();
        store
            .hset_ex("t:credential", TTL, "certificate_metadata", Bytes::from_static(b"1"))
            .await
            .unwrap();
        assert!(store.hexists("t:credential", "certificate_metadata").await.unwrap());
        assert!(!store.hexists("t:credential", "signature_metadata").await.unwrap());

        store
            .hset_ex("t:credential", TTL, "signature_metadata", Bytes::from_static(b"2"))
            .await
            .unwrap();
        assert_eq!(
            store.hget("t:credential", "certificate_metadata").await.unwrap().unwrap(),
            Bytes::from_static(b"1")
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .set_ex("t:token", TTL, Bytes::from_static(b"tok"))
            .await
            .unwrap();
        store
            .hset_ex("t:credential", TTL, "certificate_metadata", Bytes::from_static(b"s"))
            .await
            .unwrap();

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert_eq!(store.exists("t:token").await.unwrap(), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(store.exists("t:token").await.unwrap(), 0);
        assert!(store.get("t:token").await.unwrap().is_none());
        assert!(!store.hexists("t:credential", "certificate_metadata").await.unwrap());
        assert_eq!(store.purge_expired().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hash_fields_expire_individually() {
        let store = MemoryStore::new();
        store
            .hset_ex("t:credential", TTL, "certificate_metadata", Bytes::from_static(b"s"))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        store
            .hset_ex("t:credential", TTL, "signature_metadata", Bytes::from_static(b"g"))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(!store.hexists("t:credential", "certificate_metadata").await.unwrap());
        assert!(store.hexists("t:credential", "signature_metadata").await.unwrap());
        assert_eq!(store.purge_expired().await, 0);
        assert_eq!(store.exists("t:credential").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mixing_kinds_is_rejected() {
        let store = MemoryStore::new();
        store.set_ex("k", TTL, Bytes::from_static(b"v")).await.unwrap();
        assert!(matches!(
            store.hset_ex("k", TTL, "f", Bytes::from_static(b"v")).await,
            Err(StoreError::WrongType(_))
        ));
        assert!(matches!(store.hget("k", "f").await, Err(StoreError::WrongType(_))));

        // A whole-value write replaces a hash, as SET does.
        store.hset_ex("h", TTL, "f", Bytes::from_static(b"v")).await.unwrap();
        assert!(matches!(store.get("h").await, Err(StoreError::WrongType(_))));
        store.set_ex("h", TTL, Bytes::from_static(b"w")).await.unwrap();
        assert_eq!(store.get("h").await.unwrap().unwrap(), Bytes::from_static(b"w"));
    }

    #[tokio::test]
    async fn zero_ttl_rejected() {
        let store = MemoryStore::new();
        let err = store
            .set_ex("k", Duration::ZERO, Bytes::from_static(b"v"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTtl));
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_reclaims_and_stops() {
        let store = MemoryStore::new();
        store
            .set_ex("t:token", Duration::from_secs(1), Bytes::from_static(b"tok"))
            .await
            .unwrap();
        let shutdown = CancellationToken::new();
        let handle = sweep_task(store.clone(), Duration::from_secs(5), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.inner.read().await.len(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn errors_map_to_credential_kinds() {
        let e: CredentialError = StoreError::Unavailable("refused".into()).into();
        assert_eq!(e.code(), "cache_unavailable");
        let e: CredentialError = StoreError::WrongType("k".into()).into();
        assert_eq!(e.code(), "encoding_error");
    }
}

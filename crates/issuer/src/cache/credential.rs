//! Credential cache facade: namespaced, error-mapped access to a [`HashStore`].

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use common::CredentialError;
use serde::{de::DeserializeOwned, Serialize};

use super::store::HashStore;

/// Hash field holding the secret-tier record.
pub const SECRET_FIELD: &str = "certificate_metadata";

/// Hash field holding the signature-tier record.
pub const SIGNATURE_FIELD: &str = "signature_metadata";

/// Hash key holding both key-material tiers for `prefix`.
pub fn credential_namespace(prefix: &str) -> String {
    format!("{prefix}:credential")
}

/// Key holding the finished token for `prefix`.
pub fn token_namespace(prefix: &str) -> String {
    format!("{prefix}:token")
}

/// Thin wrapper over a [`HashStore`] that speaks [`CredentialError`].
///
/// A missing value surfaces as [`CredentialError::NotFound`]; any store
/// failure as [`CredentialError::CacheUnavailable`].
#[derive(Clone)]
pub struct CredentialCache {
    store: Arc<dyn HashStore>,
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache").finish_non_exhaustive()
    }
}

impl CredentialCache {
    pub fn new(store: Arc<dyn HashStore>) -> Self {
        Self { store }
    }

    /// Number of live keys among `[namespace]`.
    pub async fn exists(&self, namespace: &str) -> Result<u64, CredentialError> {
        Ok(self.store.exists(namespace).await?)
    }

    pub async fn field_exists(&self, namespace: &str, field: &str) -> Result<bool, CredentialError> {
        Ok(self.store.hexists(namespace, field).await?)
    }

    pub async fn get(&self, namespace: &str) -> Result<Bytes, CredentialError> {
        self.store
            .get(namespace)
            .await?
            .ok_or_else(|| CredentialError::NotFound(namespace.to_owned()))
    }

    pub async fn get_field(&self, namespace: &str, field: &str) -> Result<Bytes, CredentialError> {
        self.store
            .hget(namespace, field)
            .await?
            .ok_or_else(|| CredentialError::NotFound(format!("{namespace}/{field}")))
    }

    pub async fn set_with_expiry(
        &self,
        namespace: &str,
        ttl: Duration,
        value: Bytes,
    ) -> Result<(), CredentialError> {
        Ok(self.store.set_ex(namespace, ttl, value).await?)
    }

    pub async fn set_field_with_expiry(
        &self,
        namespace: &str,
        ttl: Duration,
        field: &str,
        value: Bytes,
    ) -> Result<(), CredentialError> {
        Ok(self.store.hset_ex(namespace, ttl, field, value).await?)
    }

    /// Read and decode the JSON record stored at `namespace`/`field`.
    ///
    /// # Errors
    ///
    /// [`CredentialError::NotFound`] if absent, [`CredentialError::Encoding`]
    /// if the bytes are not a valid record.
    pub async fn load_record<T: DeserializeOwned>(
        &self,
        namespace: &str,
        field: &str,
    ) -> Result<T, CredentialError> {
        let raw = self.get_field(namespace, field).await?;
        serde_json::from_slice(&raw).map_err(|e| {
            CredentialError::Encoding(format!("corrupt record at {namespace}/{field}: {e}"))
        })
    }

    /// Encode `record` as JSON and store it at `namespace`/`field`.
    pub async fn store_record<T: Serialize>(
        &self,
        namespace: &str,
        ttl: Duration,
        field: &str,
        record: &T,
    ) -> Result<(), CredentialError> {
        let raw = serde_json::to_vec(record)
            .map_err(|e| CredentialError::Encoding(format!("record encoding failed: {e}")))?;
        self.set_field_with_expiry(namespace, ttl, field, Bytes::from(raw))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::{MemoryStore, MockHashStore, StoreError};
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        #[serde(rename = "pubKey")]
        public_key: String,
    }

    const TTL: Duration = Duration::from_secs(900);

    fn memory_cache() -> CredentialCache {
        CredentialCache::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn namespaces() {
        assert_eq!(credential_namespace("acme"), "acme:credential");
        assert_eq!(token_namespace("acme"), "acme:token");
    }

    #[tokio::test]
    async fn missing_value_is_not_found() {
        let cache = memory_cache();
        let err = cache.get("acme:token").await.unwrap_err();
        assert!(matches!(err, CredentialError::NotFound(_)));
        let err = cache.get_field("acme:credential", SECRET_FIELD).await.unwrap_err();
        assert!(matches!(err, CredentialError::NotFound(_)));
    }

    #[tokio::test]
    async fn records_round_trip_through_json() {
        let cache = memory_cache();
        let ns = credential_namespace("acme");
        let record = Sample {
            public_key: "-----BEGIN PUBLIC KEY-----".into(),
        };
        cache.store_record(&ns, TTL, SECRET_FIELD, &record).await.unwrap();

        assert!(cache.field_exists(&ns, SECRET_FIELD).await.unwrap());
        assert!(!cache.field_exists(&ns, SIGNATURE_FIELD).await.unwrap());
        assert_eq!(cache.exists(&ns).await.unwrap(), 1);

        let raw = cache.get_field(&ns, SECRET_FIELD).await.unwrap();
        assert!(std::str::from_utf8(&raw).unwrap().contains("\"pubKey\""));
        let loaded: Sample = cache.load_record(&ns, SECRET_FIELD).await.unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn corrupt_record_is_encoding_error() {
        let cache = memory_cache();
        cache
            .set_field_with_expiry("acme:credential", TTL, SECRET_FIELD, Bytes::from_static(b"{"))
            .await
            .unwrap();
        let err = cache
            .load_record::<Sample>("acme:credential", SECRET_FIELD)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "encoding_error");
    }

    #[tokio::test]
    async fn store_failures_become_cache_unavailable() {
        let mut store = MockHashStore::new();
        store
            .expect_exists()
            .times(1)
            .returning(|_| Err(StoreError::Unavailable("connection refused".into())));
        store
            .expect_set_ex()
            .returning(|_, _, _| Err(StoreError::Unavailable("connection reset".into())));

        let cache = CredentialCache::new(Arc::new(store));
        let err = cache.exists("acme:token").await.unwrap_err();
        assert_eq!(err.code(), "cache_unavailable");
        assert!(err.is_retryable());

        let err = cache
            .set_with_expiry("acme:token", TTL, Bytes::from_static(b"t"))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::CacheUnavailable(_)));
    }
}

//! The three-tier credential pipeline.
//!
//! Each tier follows the same shape: check the cache, and on a miss take the
//! tier lock, check again, derive, then persist. Tiers nest strictly
//! (token → signature → secret), so locks are always taken in that order.
//!
//! ```text
//! issue_token ──miss──▶ signature tier ──miss──▶ secret tier
//!      │                      │                      │
//!      └──── {prefix}:token   └── signature_metadata └── certificate_metadata
//! ```

pub mod locks;
pub mod records;

pub use locks::TierLocks;
pub use records::{SecretRecord, SignatureRecord};

use std::{future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::Utc;
use common::CredentialError;
use serde::{de::DeserializeOwned, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    cache::{
        credential_namespace, token_namespace, CredentialCache, HashStore, SECRET_FIELD,
        SIGNATURE_FIELD,
    },
    crypto::{CryptoPrimitives, MasterKey, RsaPrimitives},
    exchange::{KeyExchangeProvider, RsaOaepExchange},
    token::{CorrelationIds, JwtCodec, TokenClaims, TokenCodec},
};

/// Layout of the free-form `claim` value.
const CLAIM_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Process-wide issuer settings.
#[derive(Debug)]
pub struct IssuerSettings {
    pub master_key: MasterKey,
    /// Lifetime of every tier, in minutes.
    pub ttl_minutes: u64,
}

impl IssuerSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes.saturating_mul(60))
    }
}

/// Lazily derives, caches, and returns per-prefix credentials.
///
/// Cheap to share behind an `Arc`; all state lives in the cache and the
/// in-process lock table.
pub struct CredentialIssuer {
    settings: Arc<IssuerSettings>,
    cache: CredentialCache,
    crypto: Arc<dyn CryptoPrimitives>,
    exchange: Arc<dyn KeyExchangeProvider>,
    codec: Arc<dyn TokenCodec>,
    locks: TierLocks,
}

impl std::fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("ttl_minutes", &self.settings.ttl_minutes)
            .finish_non_exhaustive()
    }
}

impl CredentialIssuer {
    pub fn new(
        settings: IssuerSettings,
        cache: CredentialCache,
        crypto: Arc<dyn CryptoPrimitives>,
        exchange: Arc<dyn KeyExchangeProvider>,
        codec: Arc<dyn TokenCodec>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            cache,
            crypto,
            exchange,
            codec,
            locks: TierLocks::new(),
        }
    }

    /// Issuer over `store` with the production crypto, key exchange, and JWT codec.
    pub fn with_store(settings: IssuerSettings, store: Arc<dyn HashStore>, key_bits: usize) -> Self {
        Self::new(
            settings,
            CredentialCache::new(store),
            Arc::new(RsaPrimitives::new(key_bits)),
            Arc::new(RsaOaepExchange),
            Arc::new(JwtCodec),
        )
    }

    /// Return the secret tier for `prefix`, deriving and caching it on a miss.
    pub async fn ensure_secret(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<SecretRecord, CredentialError> {
        validate_prefix(prefix)?;
        self.secret_tier(prefix, cancel).await
    }

    /// Return the signature tier for `prefix`, signing `body` on a miss.
    ///
    /// A cached signature is returned as is, even if `body` differs from the
    /// body it was made over.
    pub async fn ensure_signature<B>(
        &self,
        prefix: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<SignatureRecord, CredentialError>
    where
        B: Serialize + ?Sized,
    {
        validate_prefix(prefix)?;
        self.signature_tier(prefix, body, cancel).await
    }

    /// Return the bearer token for `prefix`.
    ///
    /// A cached token is returned verbatim. On a miss the signature tier (and,
    /// transitively, the secret tier) is ensured first and the new token is
    /// cached before it is returned.
    ///
    /// # Errors
    ///
    /// Any [`CredentialError`]; on error nothing beyond already completed
    /// lower tiers has been cached.
    #[tracing::instrument(skip(self, body, cancel))]
    pub async fn issue_token<B>(
        &self,
        prefix: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, CredentialError>
    where
        B: Serialize + ?Sized,
    {
        validate_prefix(prefix)?;
        let namespace = token_namespace(prefix);

        if let Some(token) = self.cached_token(&namespace, cancel).await? {
            debug!(tier = "token", "cache hit");
            return Ok(token.to_vec());
        }
        let _guard = self.locks.acquire(namespace.clone(), cancel).await?;
        if let Some(token) = self.cached_token(&namespace, cancel).await? {
            debug!(tier = "token", "cache hit after wait");
            return Ok(token.to_vec());
        }

        let started = Instant::now();
        let signature = self.signature_tier(prefix, body, cancel).await?;
        let ids = CorrelationIds::from_signature_hex(&signature.signature)?;

        let crypto = Arc::clone(&self.crypto);
        let codec = Arc::clone(&self.codec);
        let settings = Arc::clone(&self.settings);
        let context = prefix.to_owned();
        let token = blocking(cancel, move || {
            let token_id = crypto.seal_token_id(
                &signature.cipher_key,
                ids.token_id_plaintext(settings.ttl_minutes).as_bytes(),
                context.as_bytes(),
            )?;
            let signing_key =
                crypto.decode_private_key(&signature.private_key, &signature.cipher_key)?;

            let ttl = chrono::Duration::from_std(settings.ttl())
                .map_err(|e| CredentialError::Encoding(format!("ttl out of range: {e}")))?;
            let now = Utc::now();
            let claims = TokenClaims {
                key_id: signature.wrapped_exchange.cipher_text,
                audience: ids.audience,
                issuer: ids.issuer,
                subject: ids.subject,
                token_id,
                issued_at: now - ttl,
                expires_at: now + ttl,
                claim: now.format(CLAIM_TIME_FORMAT).to_string(),
            };
            codec.sign(&claims, &signing_key)
        })
        .await?;

        ensure_not_cancelled(cancel)?;
        self.cache
            .set_with_expiry(&namespace, self.settings.ttl(), Bytes::from(token.clone()))
            .await?;
        info!(
            tier = "token",
            elapsed_ms = started.elapsed().as_millis() as u64,
            "issued token"
        );
        Ok(token)
    }

    async fn secret_tier(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<SecretRecord, CredentialError> {
        let namespace = credential_namespace(prefix);

        if let Some(record) = self.cached_record(&namespace, SECRET_FIELD, cancel).await? {
            debug!(prefix, tier = "secret", "cache hit");
            return Ok(record);
        }
        let _guard = self.locks.acquire(lock_key(&namespace, SECRET_FIELD), cancel).await?;
        if let Some(record) = self.cached_record(&namespace, SECRET_FIELD, cancel).await? {
            debug!(prefix, tier = "secret", "cache hit after wait");
            return Ok(record);
        }

        let started = Instant::now();
        let crypto = Arc::clone(&self.crypto);
        let settings = Arc::clone(&self.settings);
        let record = blocking(cancel, move || {
            let cipher_key = crypto.derive_cipher_key(&settings.master_key)?;
            let pair = crypto.generate_key_pair(&cipher_key)?;
            Ok(SecretRecord {
                private_key: pair.sealed_private_key,
                public_key: pair.public_key_pem,
                cipher_key,
            })
        })
        .await?;

        self.persist(&namespace, SECRET_FIELD, &record, cancel).await?;
        info!(
            prefix,
            tier = "secret",
            elapsed_ms = started.elapsed().as_millis() as u64,
            "derived key pair"
        );
        Ok(record)
    }

    async fn signature_tier<B>(
        &self,
        prefix: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<SignatureRecord, CredentialError>
    where
        B: Serialize + ?Sized,
    {
        let namespace = credential_namespace(prefix);

        if let Some(record) = self.cached_record(&namespace, SIGNATURE_FIELD, cancel).await? {
            debug!(prefix, tier = "signature", "cache hit");
            return Ok(record);
        }
        let _guard = self
            .locks
            .acquire(lock_key(&namespace, SIGNATURE_FIELD), cancel)
            .await?;
        if let Some(record) = self.cached_record(&namespace, SIGNATURE_FIELD, cancel).await? {
            debug!(prefix, tier = "signature", "cache hit after wait");
            return Ok(record);
        }

        let started = Instant::now();
        let secret = self.secret_tier(prefix, cancel).await?;
        let body = serde_json::to_vec(body)
            .map_err(|e| CredentialError::Encoding(format!("body serialisation failed: {e}")))?;

        let crypto = Arc::clone(&self.crypto);
        let exchange = Arc::clone(&self.exchange);
        let record = blocking(cancel, move || {
            let private_key = crypto.decode_private_key(&secret.private_key, &secret.cipher_key)?;
            let public_key = crypto.decode_public_key(&secret.public_key)?;

            let digest = crypto.digest(&body);
            let signature = crypto.sign_digest(&private_key, &digest)?;
            crypto.verify_digest(&public_key, &digest, &signature)?;
            let signature = hex::encode(signature);

            let key_object = exchange.export_key_object(&private_key)?;
            let (_content_key, wrapped_exchange) =
                exchange.wrap_key(&public_key, signature.as_bytes())?;

            Ok(SignatureRecord {
                private_key: secret.private_key,
                signature,
                cipher_key: secret.cipher_key,
                key_object,
                wrapped_exchange,
            })
        })
        .await?;

        self.persist(&namespace, SIGNATURE_FIELD, &record, cancel).await?;
        info!(
            prefix,
            tier = "signature",
            elapsed_ms = started.elapsed().as_millis() as u64,
            "derived signature"
        );
        Ok(record)
    }

    async fn cached_token(
        &self,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>, CredentialError> {
        if cancellable(cancel, self.cache.exists(namespace)).await? == 0 {
            return Ok(None);
        }
        match cancellable(cancel, self.cache.get(namespace)).await {
            Ok(token) => Ok(Some(token)),
            Err(CredentialError::NotFound(_)) => {
                debug!(namespace, "entry expired between check and read");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// `Ok(None)` on a miss, including an entry that vanished after the existence check.
    async fn cached_record<T: DeserializeOwned>(
        &self,
        namespace: &str,
        field: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, CredentialError> {
        if !cancellable(cancel, self.cache.field_exists(namespace, field)).await? {
            return Ok(None);
        }
        match cancellable(cancel, self.cache.load_record(namespace, field)).await {
            Ok(record) => Ok(Some(record)),
            Err(CredentialError::NotFound(_)) => {
                debug!(namespace, field, "entry expired between check and read");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn persist<T: Serialize>(
        &self,
        namespace: &str,
        field: &str,
        record: &T,
        cancel: &CancellationToken,
    ) -> Result<(), CredentialError> {
        ensure_not_cancelled(cancel)?;
        self.cache
            .store_record(namespace, self.settings.ttl(), field, record)
            .await
    }
}

fn validate_prefix(prefix: &str) -> Result<(), CredentialError> {
    if prefix.trim().is_empty() {
        return Err(CredentialError::InvalidPrefix(
            "prefix must not be empty".into(),
        ));
    }
    Ok(())
}

fn lock_key(namespace: &str, field: &str) -> String {
    format!("{namespace}/{field}")
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), CredentialError> {
    if cancel.is_cancelled() {
        return Err(CredentialError::Cancelled);
    }
    Ok(())
}

async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, CredentialError>
where
    F: Future<Output = Result<T, CredentialError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CredentialError::Cancelled),
        result = fut => result,
    }
}

/// Run CPU-bound crypto on the blocking pool.
///
/// On cancellation the task is left to finish in the background and its
/// result is discarded.
async fn blocking<T, F>(cancel: &CancellationToken, work: F) -> Result<T, CredentialError>
where
    F: FnOnce() -> Result<T, CredentialError> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CredentialError::Cancelled),
        joined = task => joined
            .map_err(|e| CredentialError::Crypto(format!("crypto task failed: {e}")))
            .and_then(std::convert::identity),
    }
}

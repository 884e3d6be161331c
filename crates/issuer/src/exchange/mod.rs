//! Key exchange: portable key export and wrapped-key envelopes.
//!
//! [`KeyExchangeProvider`] is stateless; every operation is a pure function of
//! the keys it is handed.

pub mod jwe;
pub mod jwk;

pub use jwe::{ContentKey, Envelope};
pub use jwk::KeyObject;

use common::CredentialError;
use rsa::{RsaPrivateKey, RsaPublicKey};

/// Exports keys for third-party verifiers and wraps payloads to a public key.
pub trait KeyExchangeProvider: Send + Sync {
    /// Export `private_key` as a portable [`KeyObject`].
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Encoding`] if the key is malformed.
    fn export_key_object(&self, private_key: &RsaPrivateKey) -> Result<KeyObject, CredentialError>;

    /// Wrap `plaintext` to `public_key`, returning the ephemeral content key
    /// and the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Crypto`] on invalid key material.
    fn wrap_key(
        &self,
        public_key: &RsaPublicKey,
        plaintext: &[u8],
    ) -> Result<(ContentKey, Envelope), CredentialError>;

    /// Recover the plaintext of an envelope produced by [`wrap_key`](Self::wrap_key).
    fn unwrap_key(
        &self,
        private_key: &RsaPrivateKey,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, CredentialError>;
}

/// Production provider: JWK export plus RSA-OAEP-256 / A256GCM envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RsaOaepExchange;

impl KeyExchangeProvider for RsaOaepExchange {
    fn export_key_object(&self, private_key: &RsaPrivateKey) -> Result<KeyObject, CredentialError> {
        KeyObject::from_private_key(private_key)
    }

    fn wrap_key(
        &self,
        public_key: &RsaPublicKey,
        plaintext: &[u8],
    ) -> Result<(ContentKey, Envelope), CredentialError> {
        jwe::seal(public_key, plaintext)
    }

    fn unwrap_key(
        &self,
        private_key: &RsaPrivateKey,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, CredentialError> {
        jwe::open(private_key, envelope)
    }
}

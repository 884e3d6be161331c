//! RSA key generation, PEM encoding, hashing, and PKCS#1 v1.5 signatures.
//!
//! [`CryptoPrimitives`] is the seam the issuer depends on; [`RsaPrimitives`]
//! is the production implementation.

use chrono::Utc;
use common::CredentialError;
use rand::{rngs::OsRng, RngCore};
use rsa::{
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding},
    Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey,
};
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

use super::cipher::{
    decrypt_field, decrypt_field_with_aad, encrypt_field, encrypt_field_with_aad, EncryptedField,
};
use super::kdf::{derive_subkey, keyed_digest_hex, MasterKey, PRIVATE_KEY_LABEL, TOKEN_ID_LABEL};

/// Default RSA modulus size.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// `time.UnixDate`-style layout used for the cipher key seed.
const SEED_TIME_FORMAT: &str = "%a %b %e %H:%M:%S UTC %Y";

/// Random bytes mixed into every cipher key seed.
const SEED_NONCE_LEN: usize = 16;

/// A freshly generated key pair, ready to be stored.
#[derive(Clone)]
pub struct EncodedKeyPair {
    /// PKCS#8 PEM private key sealed under the cipher key (`v1.<nonce>.<ct>`).
    pub sealed_private_key: String,
    /// SPKI PEM public key.
    pub public_key_pem: String,
}

impl std::fmt::Debug for EncodedKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedKeyPair")
            .field("sealed_private_key", &"[REDACTED]")
            .field("public_key_pem", &self.public_key_pem)
            .finish()
    }
}

/// Single-primitive cryptographic operations composed by the issuer.
///
/// Implementations must be safe to call concurrently and hold no mutable state.
pub trait CryptoPrimitives: Send + Sync {
    /// Derive a new per-prefix cipher key from a time-based random seed,
    /// keyed-hashed and then sealed under `master`.
    fn derive_cipher_key(&self, master: &MasterKey) -> Result<String, CredentialError>;

    /// Generate an RSA key pair whose private half is sealed under `cipher_key`.
    fn generate_key_pair(&self, cipher_key: &str) -> Result<EncodedKeyPair, CredentialError>;

    /// Unseal and decode a private key produced by [`generate_key_pair`](Self::generate_key_pair).
    fn decode_private_key(
        &self,
        sealed_private_key: &str,
        cipher_key: &str,
    ) -> Result<RsaPrivateKey, CredentialError>;

    /// Decode an SPKI PEM public key.
    fn decode_public_key(&self, public_key_pem: &str) -> Result<RsaPublicKey, CredentialError>;

    /// SHA-512 of `data`.
    fn digest(&self, data: &[u8]) -> Vec<u8>;

    /// Sign a SHA-512 digest.
    fn sign_digest(&self, key: &RsaPrivateKey, digest: &[u8]) -> Result<Vec<u8>, CredentialError>;

    /// Verify a signature over a SHA-512 digest.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::SignatureVerification`] on mismatch.
    fn verify_digest(
        &self,
        key: &RsaPublicKey,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<(), CredentialError>;

    /// Seal `plaintext` under a sub-key of `cipher_key`, bound to `context`.
    fn seal_token_id(
        &self,
        cipher_key: &str,
        plaintext: &[u8],
        context: &[u8],
    ) -> Result<String, CredentialError>;
}

/// Production [`CryptoPrimitives`] backed by the `rsa`, `sha2`, `hmac`, and
/// `aes-gcm-siv` crates.
#[derive(Debug, Clone)]
pub struct RsaPrimitives {
    key_bits: usize,
}

impl RsaPrimitives {
    /// Create primitives generating `key_bits`-bit RSA keys.
    pub fn new(key_bits: usize) -> Self {
        Self { key_bits }
    }

    /// Open a token id sealed by [`CryptoPrimitives::seal_token_id`].
    ///
    /// # Errors
    ///
    /// Returns an error if the value is malformed or `context` does not match.
    pub fn open_token_id(
        cipher_key: &str,
        sealed: &str,
        context: &[u8],
    ) -> Result<Vec<u8>, CredentialError> {
        let field: EncryptedField = sealed.parse()?;
        let key = derive_subkey(cipher_key.as_bytes(), TOKEN_ID_LABEL);
        Ok(decrypt_field_with_aad(&field, context, key.as_slice())?)
    }
}

impl Default for RsaPrimitives {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_BITS)
    }
}

impl CryptoPrimitives for RsaPrimitives {
    fn derive_cipher_key(&self, master: &MasterKey) -> Result<String, CredentialError> {
        let mut nonce = [0u8; SEED_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let seed = format!(
            "{} {}",
            Utc::now().format(SEED_TIME_FORMAT),
            hex::encode(nonce)
        );
        let seed_hex = hex::encode(seed.as_bytes());

        let signed = Zeroizing::new(keyed_digest_hex(master.as_bytes(), seed_hex.as_bytes()));
        Ok(encrypt_field(signed.as_bytes(), master.as_bytes())?.to_string())
    }

    fn generate_key_pair(&self, cipher_key: &str) -> Result<EncodedKeyPair, CredentialError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, self.key_bits)
            .map_err(|e| CredentialError::Crypto(format!("rsa key generation failed: {e}")))?;
        let public_key_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CredentialError::Encoding(format!("public key encoding failed: {e}")))?;
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CredentialError::Encoding(format!("private key encoding failed: {e}")))?;

        let key = derive_subkey(cipher_key.as_bytes(), PRIVATE_KEY_LABEL);
        let sealed = encrypt_field(private_pem.as_bytes(), key.as_slice())?;

        Ok(EncodedKeyPair {
            sealed_private_key: sealed.to_string(),
            public_key_pem,
        })
    }

    fn decode_private_key(
        &self,
        sealed_private_key: &str,
        cipher_key: &str,
    ) -> Result<RsaPrivateKey, CredentialError> {
        let field: EncryptedField = sealed_private_key.parse()?;
        let key = derive_subkey(cipher_key.as_bytes(), PRIVATE_KEY_LABEL);
        let pem = Zeroizing::new(decrypt_field(&field, key.as_slice())?);
        let pem = std::str::from_utf8(&pem)
            .map_err(|_| CredentialError::Encoding("private key is not valid PEM text".into()))?;
        RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| CredentialError::Encoding(format!("private key decoding failed: {e}")))
    }

    fn decode_public_key(&self, public_key_pem: &str) -> Result<RsaPublicKey, CredentialError> {
        RsaPublicKey::from_public_key_pem(public_key_pem)
            .map_err(|e| CredentialError::Encoding(format!("public key decoding failed: {e}")))
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        Sha512::digest(data).to_vec()
    }

    fn sign_digest(&self, key: &RsaPrivateKey, digest: &[u8]) -> Result<Vec<u8>, CredentialError> {
        key.sign_with_rng(&mut OsRng, Pkcs1v15Sign::new::<Sha512>(), digest)
            .map_err(|e| CredentialError::Crypto(format!("rsa signing failed: {e}")))
    }

    fn verify_digest(
        &self,
        key: &RsaPublicKey,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<(), CredentialError> {
        key.verify(Pkcs1v15Sign::new::<Sha512>(), digest, signature)
            .map_err(|e| CredentialError::SignatureVerification(e.to_string()))
    }

    fn seal_token_id(
        &self,
        cipher_key: &str,
        plaintext: &[u8],
        context: &[u8],
    ) -> Result<String, CredentialError> {
        let key = derive_subkey(cipher_key.as_bytes(), TOKEN_ID_LABEL);
        Ok(encrypt_field_with_aad(plaintext, context, key.as_slice())?.to_string())
    }
}

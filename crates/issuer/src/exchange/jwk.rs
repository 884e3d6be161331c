//! JWK-style export of RSA private keys.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use common::CredentialError;
use rsa::{
    traits::{PrivateKeyParts, PublicKeyParts},
    BigUint, RsaPrivateKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Portable, algorithm-tagged form of an RSA private key (RFC 7517 members).
///
/// Big integers are unsigned big-endian, base64url without padding.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyObject {
    pub kty: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub key_use: String,
    /// RFC 7638 SHA-256 thumbprint of the public members.
    pub kid: String,
    pub n: String,
    pub e: String,
    pub d: String,
    pub p: String,
    pub q: String,
    pub dp: String,
    pub dq: String,
    pub qi: String,
}

impl std::fmt::Debug for KeyObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyObject")
            .field("kty", &self.kty)
            .field("alg", &self.alg)
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl KeyObject {
    /// Export `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Encoding`] for multi-prime keys or keys
    /// missing precomputed CRT values.
    pub fn from_private_key(key: &RsaPrivateKey) -> Result<Self, CredentialError> {
        let [p, q] = key.primes() else {
            return Err(CredentialError::Encoding(format!(
                "expected a two-prime RSA key, found {} primes",
                key.primes().len()
            )));
        };
        let missing = || CredentialError::Encoding("rsa key has no CRT parameters".into());
        let dp = key.dp().ok_or_else(missing)?;
        let dq = key.dq().ok_or_else(missing)?;
        let qi = key.crt_coefficient().ok_or_else(missing)?;

        let n = b64(key.n());
        let e = b64(key.e());
        Ok(Self {
            kty: "RSA".into(),
            alg: "RS512".into(),
            key_use: "sig".into(),
            kid: thumbprint(&n, &e),
            d: b64(key.d()),
            p: b64(p),
            q: b64(q),
            dp: b64(dp),
            dq: b64(dq),
            qi: b64(&qi),
            n,
            e,
        })
    }
}

fn b64(value: &BigUint) -> String {
    URL_SAFE_NO_PAD.encode(value.to_bytes_be())
}

/// RFC 7638 thumbprint: SHA-256 over the lexicographically ordered required members.
fn thumbprint(n: &str, e: &str) -> String {
    let canonical = format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

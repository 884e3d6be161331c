//! Key material derivation: the deployment master key and labelled sub-keys.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use zeroize::{Zeroize, Zeroizing};

use super::cipher::KEY_LEN;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Sub-key label for sealing a tier's PKCS#8 private key.
pub const PRIVATE_KEY_LABEL: &str = "credential/private-key";

/// Sub-key label for sealing token ids.
pub const TOKEN_ID_LABEL: &str = "credential/token-id";

/// The process-wide master key that seals every per-prefix cipher key.
///
/// Derived once at startup as SHA-256 of the configured secret. The bytes are
/// zeroized on drop.
#[derive(Clone)]
pub struct MasterKey(Zeroizing<[u8; KEY_LEN]>);

impl MasterKey {
    /// Derive the master key from the configured secret string.
    pub fn from_secret(secret: &str) -> Self {
        let mut digest = Sha256::digest(secret.as_bytes());
        let mut buf = Zeroizing::new([0u8; KEY_LEN]);
        buf.copy_from_slice(&digest);
        digest.as_mut_slice().zeroize();
        Self(buf)
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// Derive a 256-bit sub-key from `secret` for the purpose named by `label`.
///
/// HMAC-SHA-256 keyed by the secret; distinct labels give independent keys.
/// The returned buffer is zeroized when dropped.
pub fn derive_subkey(secret: &[u8], label: &str) -> Zeroizing<[u8; KEY_LEN]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(label.as_bytes());
    let mut subkey = Zeroizing::new([0u8; KEY_LEN]);
    subkey.copy_from_slice(&mac.finalize().into_bytes());
    subkey
}

/// HMAC-SHA-512 of `message` under `key`, hex-encoded.
pub fn keyed_digest_hex(key: &[u8], message: &[u8]) -> String {
    let mut mac = <HmacSha512 as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

//! Cached record types for the secret and signature tiers.

use serde::{Deserialize, Serialize};

use crate::exchange::{Envelope, KeyObject};

/// Base key material for a prefix.
///
/// `private_key` is always the sealed form (`v1.<nonce>.<ciphertext>`).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    #[serde(rename = "privKey")]
    pub private_key: String,
    #[serde(rename = "pubKey")]
    pub public_key: String,
    #[serde(rename = "cipherKey")]
    pub cipher_key: String,
}

impl std::fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRecord")
            .field("private_key", &"[REDACTED]")
            .field("public_key", &self.public_key)
            .field("cipher_key", &"[REDACTED]")
            .finish()
    }
}

/// A request body bound to a [`SecretRecord`] by signature.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    #[serde(rename = "privKey")]
    pub private_key: String,
    /// Hex-encoded PKCS#1 v1.5 signature over SHA-512 of the serialised body.
    #[serde(rename = "sigKey")]
    pub signature: String,
    #[serde(rename = "cipherKey")]
    pub cipher_key: String,
    #[serde(rename = "jwkKey")]
    pub key_object: KeyObject,
    /// `signature` wrapped to the secret tier's public key.
    #[serde(rename = "jweKey")]
    pub wrapped_exchange: Envelope,
}

impl std::fmt::Debug for SignatureRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureRecord")
            .field("key_object", &self.key_object)
            .field("wrapped_exchange", &self.wrapped_exchange)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_record_wire_names() {
        let record = SecretRecord {
            private_key: "v1.n.c".into(),
            public_key: "-----BEGIN PUBLIC KEY-----".into(),
            cipher_key: "v1.k.c".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["privKey"], "v1.n.c");
        assert_eq!(json["pubKey"], "-----BEGIN PUBLIC KEY-----");
        assert_eq!(json["cipherKey"], "v1.k.c");

        let back: SecretRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn secret_record_debug_hides_key_material() {
        let record = SecretRecord {
            private_key: "sealed-private".into(),
            public_key: "public".into(),
            cipher_key: "sealed-cipher".into(),
        };
        let debug = format!("{record:?}");
        assert!(!debug.contains("sealed-private"));
        assert!(!debug.contains("sealed-cipher"));
        assert!(debug.contains("public"));
    }
}

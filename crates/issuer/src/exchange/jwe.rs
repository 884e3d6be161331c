//! JWE-style key wrapping: RSA-OAEP-256 wrapped content key + AES-256-GCM payload.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use common::CredentialError;
use rand::{rngs::OsRng, RngCore};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::KEY_LEN;

/// Key management algorithm recorded in the protected header.
pub const KEY_ALGORITHM: &str = "RSA-OAEP-256";

/// Content encryption algorithm recorded in the protected header (RFC 7518 §5.3).
pub const CONTENT_ALGORITHM: &str = "A256GCM";

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Ephemeral content-encryption key produced by a wrap.
///
/// Zeroized on drop and never printed.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ContentKey([u8; KEY_LEN]);

impl ContentKey {
    fn generate() -> Self {
        let mut key = Self([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut key.0);
        key
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContentKey([REDACTED])")
    }
}

#[derive(Serialize, Deserialize)]
struct ProtectedHeader {
    alg: String,
    enc: String,
}

/// A wrapped-key envelope.
///
/// All binary members are base64url without padding. The ASCII bytes of
/// `protected` are the AEAD associated data, as in JWE compact serialisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub protected: String,
    pub encrypted_key: String,
    pub iv: String,
    /// Payload ciphertext without the tag. Doubles as the token `kid`.
    pub cipher_text: String,
    /// 128-bit GCM authentication tag.
    pub tag: String,
}

/// Wrap `plaintext` so only the holder of `public_key`'s private half can read it.
///
/// # Errors
///
/// Returns [`CredentialError::Crypto`] if the public key cannot encrypt the content key.
pub fn seal(
    public_key: &RsaPublicKey,
    plaintext: &[u8],
) -> Result<(ContentKey, Envelope), CredentialError> {
    let content_key = ContentKey::generate();
    let encrypted_key = public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), content_key.as_bytes())
        .map_err(|e| CredentialError::Crypto(format!("content key wrap failed: {e}")))?;

    let header = serde_json::to_vec(&ProtectedHeader {
        alg: KEY_ALGORITHM.into(),
        enc: CONTENT_ALGORITHM.into(),
    })
    .map_err(|e| CredentialError::Encoding(e.to_string()))?;
    let protected = URL_SAFE_NO_PAD.encode(header);

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let mut sealed = content_cipher(content_key.as_bytes())?
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: protected.as_bytes(),
            },
        )
        .map_err(|_| CredentialError::Crypto("payload encryption failed".into()))?;
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    let envelope = Envelope {
        encrypted_key: URL_SAFE_NO_PAD.encode(encrypted_key),
        iv: URL_SAFE_NO_PAD.encode(iv),
        cipher_text: URL_SAFE_NO_PAD.encode(&sealed),
        tag: URL_SAFE_NO_PAD.encode(tag),
        protected,
    };
    Ok((content_key, envelope))
}

/// Recover the plaintext of an [`Envelope`] with the matching private key.
///
/// # Errors
///
/// Returns [`CredentialError::Encoding`] for malformed members or an
/// unsupported header, and [`CredentialError::Crypto`] on a wrong key or tampering.
pub fn open(private_key: &RsaPrivateKey, envelope: &Envelope) -> Result<Vec<u8>, CredentialError> {
    let header: ProtectedHeader = serde_json::from_slice(&decode_member(&envelope.protected)?)
        .map_err(|e| CredentialError::Encoding(format!("invalid protected header: {e}")))?;
    if header.alg != KEY_ALGORITHM || header.enc != CONTENT_ALGORITHM {
        return Err(CredentialError::Encoding(format!(
            "unsupported envelope algorithms {}/{}",
            header.alg, header.enc
        )));
    }

    let content_key = Zeroizing::new(
        private_key
            .decrypt(Oaep::new::<Sha256>(), &decode_member(&envelope.encrypted_key)?)
            .map_err(|e| CredentialError::Crypto(format!("content key unwrap failed: {e}")))?,
    );

    let iv = decode_member(&envelope.iv)?;
    if iv.len() != IV_LEN {
        return Err(CredentialError::Encoding(
            "envelope iv has the wrong length".into(),
        ));
    }
    let tag = decode_member(&envelope.tag)?;
    if tag.len() != TAG_LEN {
        return Err(CredentialError::Encoding(
            "envelope tag has the wrong length".into(),
        ));
    }
    let mut sealed = decode_member(&envelope.cipher_text)?;
    sealed.extend_from_slice(&tag);

    content_cipher(&content_key)?
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &sealed,
                aad: envelope.protected.as_bytes(),
            },
        )
        .map_err(|_| CredentialError::Crypto("payload authentication failed".into()))
}

fn content_cipher(key: &[u8]) -> Result<Aes256Gcm, CredentialError> {
    Aes256Gcm::new_from_slice(key)
        .map_err(|_| CredentialError::Crypto("content key has the wrong length".into()))
}

fn decode_member(value: &str) -> Result<Vec<u8>, CredentialError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| CredentialError::Encoding(format!("invalid base64url member: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut OsRng, 2048).unwrap()
    }

    #[test]
    fn seal_open_round_trip() {
        let private_key = key();
        let signature_hex = "ab".repeat(256);
        let (content_key, envelope) =
            seal(&private_key.to_public_key(), signature_hex.as_bytes()).unwrap();
        assert_eq!(content_key.as_bytes().len(), KEY_LEN);
        assert_eq!(open(&private_key, &envelope).unwrap(), signature_hex.as_bytes());
    }

    #[test]
    fn wrong_private_key_cannot_open() {
        let (_, envelope) = seal(&key().to_public_key(), b"payload").unwrap();
        let err = open(&key(), &envelope).unwrap_err();
        assert_eq!(err.code(), "crypto_error");
    }

    #[test]
    fn tampered_header_fails_authentication() {
        let private_key = key();
        let (_, mut envelope) = seal(&private_key.to_public_key(), b"payload").unwrap();
        // Same algorithms, different bytes: the AAD no longer matches.
        envelope.protected =
            URL_SAFE_NO_PAD.encode(br#"{"enc":"A256GCM","alg":"RSA-OAEP-256"}"#);
        assert!(open(&private_key, &envelope).is_err());
    }

    #[test]
    fn protected_header_uses_registered_algorithms() {
        let (_, envelope) = seal(&key().to_public_key(), b"payload").unwrap();
        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(&envelope.protected).unwrap()).unwrap();
        assert_eq!(header["alg"], "RSA-OAEP-256");
        assert_eq!(header["enc"], "A256GCM");
        assert_eq!(URL_SAFE_NO_PAD.decode(&envelope.iv).unwrap().len(), IV_LEN);
        assert_eq!(URL_SAFE_NO_PAD.decode(&envelope.tag).unwrap().len(), TAG_LEN);
        // GCM ciphertext is as long as the plaintext once the tag is split off.
        assert_eq!(
            URL_SAFE_NO_PAD.decode(&envelope.cipher_text).unwrap().len(),
            b"payload".len()
        );
    }

    #[test]
    fn tampered_tag_fails_authentication() {
        let private_key = key();
        let (_, mut envelope) = seal(&private_key.to_public_key(), b"payload").unwrap();
        let mut tag = URL_SAFE_NO_PAD.decode(&envelope.tag).unwrap();
        tag[0] ^= 0x01;
        envelope.tag = URL_SAFE_NO_PAD.encode(tag);
        assert_eq!(open(&private_key, &envelope).unwrap_err().code(), "crypto_error");
    }

    #[test]
    fn explicit_zeroize_clears_content_key() {
        let mut content_key = ContentKey::generate();
        assert_ne!(content_key.as_bytes(), &[0u8; KEY_LEN][..]);
        content_key.zeroize();
        assert_eq!(content_key.as_bytes(), &[0u8; KEY_LEN][..]);
    }

    #[test]
    fn content_key_redacted_in_debug() {
        assert!(format!("{:?}", ContentKey::generate()).contains("REDACTED"));
    }
}

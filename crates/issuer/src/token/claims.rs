//! Token claim set and the signature-derived correlation identifiers.

use chrono::{DateTime, Utc};
use common::CredentialError;

/// Offsets into the signature hex string for `aud`, `iss`, and `sub`.
///
/// These are non-cryptographic correlation ids. The byte ranges are part of the
/// token format and must not change.
const AUDIENCE_RANGE: std::ops::Range<usize> = 10..20;
const ISSUER_RANGE: std::ops::Range<usize> = 30..40;
const SUBJECT_RANGE: std::ops::Range<usize> = 50..60;

/// Minimum signature hex length required to derive all three identifiers.
pub const MIN_SIGNATURE_HEX_LEN: usize = SUBJECT_RANGE.end;

/// Audience, issuer, and subject sliced from a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationIds {
    pub audience: String,
    pub issuer: String,
    pub subject: String,
}

impl CorrelationIds {
    /// Slice the identifiers out of `signature_hex`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Encoding`] if the string is shorter than
    /// [`MIN_SIGNATURE_HEX_LEN`] or is not ASCII.
    pub fn from_signature_hex(signature_hex: &str) -> Result<Self, CredentialError> {
        if signature_hex.len() < MIN_SIGNATURE_HEX_LEN {
            return Err(CredentialError::Encoding(format!(
                "signature hex must be at least {MIN_SIGNATURE_HEX_LEN} characters, got {}",
                signature_hex.len()
            )));
        }
        let slice = |range: std::ops::Range<usize>| {
            signature_hex
                .get(range)
                .map(str::to_owned)
                .ok_or_else(|| CredentialError::Encoding("signature hex is not ASCII".into()))
        };
        Ok(Self {
            audience: slice(AUDIENCE_RANGE)?,
            issuer: slice(ISSUER_RANGE)?,
            subject: slice(SUBJECT_RANGE)?,
        })
    }

    /// Hex of `audience:issuer:subject:ttl_minutes`, the plaintext sealed into `jti`.
    pub fn token_id_plaintext(&self, ttl_minutes: u64) -> String {
        hex::encode(format!(
            "{}:{}:{}:{}",
            self.audience, self.issuer, self.subject, ttl_minutes
        ))
    }
}

/// The semantic payload of an issued token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// Ciphertext member of the signature tier's wrapped-key envelope.
    pub key_id: String,
    pub audience: String,
    pub issuer: String,
    pub subject: String,
    /// Sealed, prefix-bound token id (`jti`).
    pub token_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Free-form claim; the issuance timestamp.
    pub claim: String,
}

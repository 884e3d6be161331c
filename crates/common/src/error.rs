//! Error kinds surfaced by the credential pipeline.

use thiserror::Error;

/// Top-level error returned by every credential-issuing operation.
///
/// A caller receiving any variant must treat the call as "no token issued".
/// No tier is ever partially cached on the error path.
///
/// Variants map to stable machine-readable codes via [`CredentialError::code`]:
/// - [`CredentialError::CacheUnavailable`] → `cache_unavailable`
/// - [`CredentialError::SignatureVerification`] → `signature_verification`
/// - [`CredentialError::Cancelled`] → `cancelled`
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The cache store is unreachable, timed out, or rejected the operation.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// A cache entry expected to be present was missing.
    ///
    /// After a positive existence check this indicates the entry expired (or
    /// was evicted) between the check and the read.
    #[error("cache entry not found: {0}")]
    NotFound(String),

    /// Key generation, encryption, decryption, or key wrapping failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A freshly produced signature did not verify against its own public key.
    ///
    /// Indicates corrupted key state or a crypto-library defect. Never retried.
    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    /// Serialisation, deserialisation, or key encoding failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The token codec could not produce (or validate) a signed token.
    #[error("token signing failed: {0}")]
    Signing(String),

    /// The caller supplied an empty prefix.
    #[error("invalid prefix: {0}")]
    InvalidPrefix(String),

    /// The caller cancelled the operation before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl CredentialError {
    /// Returns the machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            CredentialError::CacheUnavailable(_) => "cache_unavailable",
            CredentialError::NotFound(_) => "not_found",
            CredentialError::Crypto(_) => "crypto_error",
            CredentialError::SignatureVerification(_) => "signature_verification",
            CredentialError::Encoding(_) => "encoding_error",
            CredentialError::Signing(_) => "signing_error",
            CredentialError::InvalidPrefix(_) => "invalid_prefix",
            CredentialError::Cancelled => "cancelled",
        }
    }

    /// Returns `true` if repeating the same call may succeed.
    ///
    /// The pipeline itself never retries; this only informs caller policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CredentialError::CacheUnavailable(_) | CredentialError::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            CredentialError::CacheUnavailable("x".into()).code(),
            "cache_unavailable"
        );
        assert_eq!(CredentialError::NotFound("x".into()).code(), "not_found");
        assert_eq!(CredentialError::Crypto("x".into()).code(), "crypto_error");
        assert_eq!(
            CredentialError::SignatureVerification("x".into()).code(),
            "signature_verification"
        );
        assert_eq!(CredentialError::Encoding("x".into()).code(), "encoding_error");
        assert_eq!(CredentialError::Signing("x".into()).code(), "signing_error");
        assert_eq!(
            CredentialError::InvalidPrefix("x".into()).code(),
            "invalid_prefix"
        );
        assert_eq!(CredentialError::Cancelled.code(), "cancelled");
    }

    #[test]
    fn only_transient_kinds_are_retryable() {
        assert!(CredentialError::CacheUnavailable("down".into()).is_retryable());
        assert!(CredentialError::Cancelled.is_retryable());
        assert!(!CredentialError::SignatureVerification("bad".into()).is_retryable());
        assert!(!CredentialError::NotFound("gone".into()).is_retryable());
    }

    #[test]
    fn display_includes_message() {
        let e = CredentialError::CacheUnavailable("connection refused".into());
        assert!(e.to_string().contains("connection refused"));
    }
}

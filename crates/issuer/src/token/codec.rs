//! RS512 JWT encoding and verification.

use chrono::{DateTime, Utc};
use common::CredentialError;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rsa::{
    pkcs8::{EncodePrivateKey, LineEnding},
    RsaPrivateKey,
};
use serde::{Deserialize, Serialize};

use super::claims::TokenClaims;

/// Signature algorithm of every issued token.
pub const TOKEN_ALGORITHM: Algorithm = Algorithm::RS512;

/// Serialises claim sets into signed bearer tokens.
pub trait TokenCodec: Send + Sync {
    /// Sign `claims` with `signing_key`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Signing`] if the key cannot produce a signature.
    fn sign(
        &self,
        claims: &TokenClaims,
        signing_key: &RsaPrivateKey,
    ) -> Result<Vec<u8>, CredentialError>;
}

/// Registered claims as they appear in the JWT payload.
#[derive(Debug, Serialize, Deserialize)]
struct WireClaims {
    aud: Vec<String>,
    iss: String,
    sub: String,
    jti: String,
    iat: i64,
    exp: i64,
    claim: String,
}

/// Compact JWS codec: `kid` in the header, registered claims plus `claim` in the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct JwtCodec;

impl JwtCodec {
    /// Verify `token` against `public_key_pem` (SPKI) and return its claims.
    ///
    /// Checks the RS512 signature and `exp`. The audience is returned for the
    /// caller to check; it is not validated here.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Signing`] if the token is malformed, expired,
    /// or signed by another key.
    pub fn verify(token: &[u8], public_key_pem: &str) -> Result<TokenClaims, CredentialError> {
        let token = std::str::from_utf8(token)
            .map_err(|_| CredentialError::Signing("token is not valid UTF-8".into()))?;
        let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| CredentialError::Signing(format!("invalid verification key: {e}")))?;

        let mut validation = Validation::new(TOKEN_ALGORITHM);
        validation.validate_aud = false;

        let data = decode::<WireClaims>(token, &key, &validation)
            .map_err(|e| CredentialError::Signing(format!("token rejected: {e}")))?;
        let key_id = data
            .header
            .kid
            .ok_or_else(|| CredentialError::Signing("token header has no kid".into()))?;

        let wire = data.claims;
        let timestamp = |secs: i64| {
            DateTime::<Utc>::from_timestamp(secs, 0)
                .ok_or_else(|| CredentialError::Signing(format!("timestamp out of range: {secs}")))
        };
        let audience = wire
            .aud
            .into_iter()
            .next()
            .ok_or_else(|| CredentialError::Signing("token has no audience".into()))?;

        Ok(TokenClaims {
            key_id,
            audience,
            issuer: wire.iss,
            subject: wire.sub,
            token_id: wire.jti,
            issued_at: timestamp(wire.iat)?,
            expires_at: timestamp(wire.exp)?,
            claim: wire.claim,
        })
    }
}

impl TokenCodec for JwtCodec {
    fn sign(
        &self,
        claims: &TokenClaims,
        signing_key: &RsaPrivateKey,
    ) -> Result<Vec<u8>, CredentialError> {
        let pem = signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CredentialError::Signing(format!("signing key encoding failed: {e}")))?;
        let key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| CredentialError::Signing(format!("invalid signing key: {e}")))?;

        let mut header = Header::new(TOKEN_ALGORITHM);
        header.kid = Some(claims.key_id.clone());

        let wire = WireClaims {
            aud: vec![claims.audience.clone()],
            iss: claims.issuer.clone(),
            sub: claims.subject.clone(),
            jti: claims.token_id.clone(),
            iat: claims.issued_at.timestamp(),
            exp: claims.expires_at.timestamp(),
            claim: claims.claim.clone(),
        };

        encode(&header, &wire, &key)
            .map(String::into_bytes)
            .map_err(|e| CredentialError::Signing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use chrono::Duration;
    use rand::rngs::OsRng;
    use rsa::pkcs8::EncodePublicKey;

    fn claims(ttl: Duration) -> TokenClaims {
        let now = Utc::now();
        TokenClaims {
            key_id: "wrapped-ciphertext".into(),
            audience: "aaaaaaaaaa".into(),
            issuer: "iiiiiiiiii".into(),
            subject: "ssssssssss".into(),
            token_id: "v1.nonce.jti".into(),
            issued_at: now - ttl,
            expires_at: now + ttl,
            claim: now.format("%Y/%m/%d %H:%M:%S").to_string(),
        }
    }

    fn key_pair() -> (RsaPrivateKey, String) {
        let key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public_pem = key.to_public_key().to_public_key_pem(LineEnding::LF).unwrap();
        (key, public_pem)
    }

    #[test]
    fn sign_then_verify_preserves_claims() {
        let (key, public_pem) = key_pair();
        let expected = claims(Duration::minutes(15));
        let token = JwtCodec.sign(&expected, &key).unwrap();

        let decoded = JwtCodec::verify(&token, &public_pem).unwrap();
        assert_eq!(decoded.key_id, expected.key_id);
        assert_eq!(decoded.audience, expected.audience);
        assert_eq!(decoded.issuer, expected.issuer);
        assert_eq!(decoded.subject, expected.subject);
        assert_eq!(decoded.token_id, expected.token_id);
        assert_eq!(decoded.claim, expected.claim);
        assert_eq!(decoded.expires_at.timestamp(), expected.expires_at.timestamp());
    }

    #[test]
    fn header_declares_rs512_and_kid() {
        let (key, _) = key_pair();
        let token = JwtCodec.sign(&claims(Duration::minutes(15)), &key).unwrap();
        let token = String::from_utf8(token).unwrap();
        let header = token.split('.').next().unwrap();
        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).unwrap()).unwrap();
        assert_eq!(header["alg"], "RS512");
        assert_eq!(header["kid"], "wrapped-ciphertext");
    }

    #[test]
    fn payload_carries_audience_array() {
        let (key, _) = key_pair();
        let token = JwtCodec.sign(&claims(Duration::minutes(15)), &key).unwrap();
        let token = String::from_utf8(token).unwrap();
        let payload = token.split('.').nth(1).unwrap();
        let payload: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();
        assert_eq!(payload["aud"], serde_json::json!(["aaaaaaaaaa"]));
        assert!(payload["iat"].as_i64().unwrap() < payload["exp"].as_i64().unwrap());
    }

    #[test]
    fn other_key_rejects_token() {
        let (key, _) = key_pair();
        let (_, other_pem) = key_pair();
        let token = JwtCodec.sign(&claims(Duration::minutes(15)), &key).unwrap();
        let err = JwtCodec::verify(&token, &other_pem).unwrap_err();
        assert_eq!(err.code(), "signing_error");
    }

    #[test]
    fn expired_token_is_rejected() {
        let (key, public_pem) = key_pair();
        let mut expired = claims(Duration::minutes(15));
        expired.expires_at = Utc::now() - Duration::minutes(10);
        let token = JwtCodec.sign(&expired, &key).unwrap();
        assert!(JwtCodec::verify(&token, &public_pem).is_err());
    }
}

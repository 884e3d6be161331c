//! Request and response lines exchanged with the issuer worker.
//!
//! The worker reads one JSON object per line on stdin and writes one JSON
//! object per line on stdout.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Issue token
// ---------------------------------------------------------------------------

/// A single token issuance request.
///
/// `body` is the request to be attested; it is signed verbatim (as serialised
/// JSON) the first time a signature is derived for `prefix`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueTokenRequest {
    /// Optional caller-chosen correlation id, echoed back in the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Tenant or session scope the token is issued for. Must be non-empty.
    pub prefix: String,
    /// Arbitrary JSON value representing the request being attested.
    #[serde(default)]
    pub body: serde_json::Value,
}

/// Successful response line carrying the encoded token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueTokenResponse {
    /// Correlation id copied from the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Compact JWS token.
    pub token: String,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Response line emitted when a request fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Correlation id copied from the request, when one could be parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Short machine-readable error code (e.g. `"cache_unavailable"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(id: Option<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_body_defaults_to_null() {
        let req: IssueTokenRequest = serde_json::from_str(r#"{"prefix":"tenant-a"}"#).unwrap();
        assert_eq!(req.prefix, "tenant-a");
        assert!(req.id.is_none());
        assert!(req.body.is_null());
    }

    #[test]
    fn request_keeps_nested_body() {
        let req: IssueTokenRequest = serde_json::from_value(json!({
            "id": "42",
            "prefix": "tenant-a",
            "body": {"user": "alice", "roles": ["admin"]}
        }))
        .unwrap();
        assert_eq!(req.id.as_deref(), Some("42"));
        assert_eq!(req.body["roles"][0], "admin");
    }

    #[test]
    fn response_omits_missing_id() {
        let resp = IssueTokenResponse {
            id: None,
            token: "a.b.c".into(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"token":"a.b.c"}"#);
    }

    #[test]
    fn error_response_new() {
        let e = ErrorResponse::new(Some("7".into()), "invalid_prefix", "prefix must not be empty");
        assert_eq!(e.id.as_deref(), Some("7"));
        assert_eq!(e.code, "invalid_prefix");
        assert!(e.message.contains("prefix"));
    }
}

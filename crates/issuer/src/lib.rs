//! Lazily derived, cached per-prefix credentials.
//!
//! For each prefix the issuer materialises three tiers on demand, each cached
//! with the same TTL:
//!
//! 1. a secret tier: an RSA key pair whose private half is sealed under a
//!    per-prefix cipher key,
//! 2. a signature tier binding a request body to that key pair, and
//! 3. an RS512 bearer token referencing the signature tier.
//!
//! [`CredentialIssuer::issue_token`] is the entry point.

pub mod cache;
pub mod config;
pub mod crypto;
pub mod exchange;
pub mod issuer;
pub mod telemetry;
pub mod token;
pub mod worker;

pub use cache::{CredentialCache, HashStore, MemoryStore, RedisStore};
pub use common::CredentialError;
pub use issuer::{CredentialIssuer, IssuerSettings, SecretRecord, SignatureRecord};

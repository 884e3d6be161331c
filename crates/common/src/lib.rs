//! Common error kinds and worker protocol types shared across `credential-issuer` crates.

pub mod error;
pub mod protocol;

pub use error::CredentialError;

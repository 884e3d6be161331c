//! Cryptographic primitives composed by the credential pipeline.
//!
//! This module is free of cache and token concerns. It provides:
//!
//! - [`cipher`]: AES-256-GCM-SIV sealing of secret strings.
//! - [`kdf`]: the deployment [`MasterKey`] and labelled sub-key derivation.
//! - [`primitives`]: RSA key generation, PEM encoding, SHA-512, and
//!   PKCS#1 v1.5 signatures behind the [`CryptoPrimitives`] seam.
//!
//! # Sealed value format
//!
//! ```text
//! v1.<base64url-no-pad(nonce)>.<base64url-no-pad(ciphertext+tag)>
//! ```

pub mod cipher;
pub mod kdf;
pub mod primitives;

pub use cipher::KEY_LEN;
pub use kdf::MasterKey;
pub use primitives::{CryptoPrimitives, EncodedKeyPair, RsaPrimitives};

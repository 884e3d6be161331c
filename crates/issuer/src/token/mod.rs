//! Bearer token construction: claim derivation and the RS512 JWT codec.

pub mod claims;
pub mod codec;

pub use claims::{CorrelationIds, TokenClaims};
pub use codec::{JwtCodec, TokenCodec};

//! Cache layer: the [`HashStore`] seam, its in-memory and Redis backends, and
//! the namespaced [`CredentialCache`] facade the issuer talks to.

pub mod credential;
pub mod redis_store;
pub mod store;

pub use credential::{
    credential_namespace, token_namespace, CredentialCache, SECRET_FIELD, SIGNATURE_FIELD,
};
pub use redis_store::RedisStore;
pub use store::{sweep_task, HashStore, MemoryStore, StoreError};

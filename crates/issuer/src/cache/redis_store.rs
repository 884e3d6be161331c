//! [`HashStore`] backed by a Redis server.
//!
//! Per-field expiry is set with `HPEXPIRE`, which needs Redis 7.4 or newer.
//! The field write and its expiry go out as one `MULTI`/`EXEC` transaction.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::{aio::ConnectionManager, Client, RedisError};
use tracing::{debug, info};

use super::store::{HashStore, StoreError};

/// Server error code for a command run against the wrong kind of value.
const WRONG_TYPE: &str = "WRONGTYPE";

/// A [`HashStore`] over a multiplexed, auto-reconnecting Redis connection.
///
/// Clones share the connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the server at `url` (`redis://` or `rediss://`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the URL is malformed or the
    /// server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)
            .map_err(|e| StoreError::Unavailable(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(format!("redis connection failed: {e}")))?;
        info!("connected to redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl HashStore for RedisStore {
    async fn exists(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error(key, e))
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("HEXISTS")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error(key, e))
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error(key, e))?;
        Ok(value.map(Bytes::from))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error(key, e))?;
        Ok(value.map(Bytes::from))
    }

    async fn set_ex(&self, key: &str, ttl: Duration, value: Bytes) -> Result<(), StoreError> {
        let millis = ttl_millis(ttl)?;
        let mut conn = self.conn.clone();
        let () = redis::cmd("SET")
            .arg(key)
            .arg(&value[..])
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error(key, e))?;
        debug!(key, ttl_ms = millis, "value stored");
        Ok(())
    }

    async fn hset_ex(
        &self,
        key: &str,
        ttl: Duration,
        field: &str,
        value: Bytes,
    ) -> Result<(), StoreError> {
        let millis = ttl_millis(ttl)?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(&value[..])
            .ignore()
            .cmd("HPEXPIRE")
            .arg(key)
            .arg(millis)
            .arg("FIELDS")
            .arg(1)
            .arg(field)
            .ignore();

        let mut conn = self.conn.clone();
        let () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error(key, e))?;
        debug!(key, field, ttl_ms = millis, "hash field stored");
        Ok(())
    }
}

/// Whole milliseconds of `ttl`; anything under one millisecond is rejected.
fn ttl_millis(ttl: Duration) -> Result<u64, StoreError> {
    match u64::try_from(ttl.as_millis()) {
        Ok(0) => Err(StoreError::InvalidTtl),
        Ok(millis) => Ok(millis),
        Err(_) => Ok(u64::MAX),
    }
}

fn store_error(key: &str, e: RedisError) -> StoreError {
    if e.code() == Some(WRONG_TYPE) {
        StoreError::WrongType(key.to_owned())
    } else {
        StoreError::Unavailable(e.to_string())
    }
}

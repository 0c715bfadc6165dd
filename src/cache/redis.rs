//! Redis cache implementation
//!
//! Backs the sticky-session mappings and the resolved API token cache.
//! Values are stored as JSON strings and every write carries an expiry.

use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::AppResult;

/// Redis-backed key/value store shared across gateway replicas
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;

        raw.map(|v| serde_json::from_str(&v))
            .transpose()
            .map_err(Into::into)
    }

    /// Store a value that expires after `ttl_seconds`
    pub async fn set_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let serialized = serde_json::to_string(value)?;
        conn.set_ex::<_, _, ()>(key, serialized, ttl_seconds).await?;
        Ok(())
    }

    /// Push a live key's expiry out to `seconds` from now
    ///
    /// A missing key stays missing.
    pub async fn expire(&self, key: &str, seconds: u64) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, seconds as i64).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    pub async fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

/// Cache key layout
pub mod keys {
    /// Sticky-session mapping, scoped by channel type so affine types never
    /// share a conversation
    pub fn sticky_session(channel_type: &str, session_hash: &str) -> String {
        format!("relaygate:sticky:{}:{}", channel_type, session_hash)
    }

    /// Resolved API token, keyed by the SHA-256 of the bearer secret
    pub fn token(token_hash: &str) -> String {
        format!("relaygate:token:{}", token_hash)
    }
}

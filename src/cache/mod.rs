//! Cache module
//!
//! Provides the Redis-backed cache used for sticky sessions and token
//! resolution, plus an in-memory stand-in for tests.

pub mod in_memory;
pub mod redis;

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::AppResult;

pub use self::in_memory::InMemoryCache;
pub use self::redis::RedisCache;

/// Cache backend abstraction
///
/// Lets consumers work with either Redis or the in-memory cache without
/// caring which one is configured.
#[derive(Clone)]
pub enum CacheBackend {
    /// Redis-based cache for production use
    Redis(Arc<RedisCache>),
    /// Process-local cache
    InMemory(Arc<InMemoryCache>),
}

impl CacheBackend {
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        match self {
            CacheBackend::Redis(cache) => cache.get(key).await,
            CacheBackend::InMemory(cache) => cache.get(key).await,
        }
    }

    pub async fn set_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> AppResult<()> {
        match self {
            CacheBackend::Redis(cache) => cache.set_with_ttl(key, value, ttl_seconds).await,
            CacheBackend::InMemory(cache) => cache.set_with_ttl(key, value, ttl_seconds).await,
        }
    }

    pub async fn expire(&self, key: &str, seconds: u64) -> AppResult<()> {
        match self {
            CacheBackend::Redis(cache) => cache.expire(key, seconds).await,
            CacheBackend::InMemory(cache) => cache.expire(key, seconds).await,
        }
    }

    pub async fn delete(&self, key: &str) -> AppResult<()> {
        match self {
            CacheBackend::Redis(cache) => cache.delete(key).await,
            CacheBackend::InMemory(cache) => cache.delete(key).await,
        }
    }

    /// Check the backend is reachable
    pub async fn ping(&self) -> AppResult<()> {
        match self {
            CacheBackend::Redis(cache) => cache.ping().await,
            CacheBackend::InMemory(_) => Ok(()),
        }
    }

    /// Backend name for logs and health output
    pub fn kind(&self) -> &'static str {
        match self {
            CacheBackend::Redis(_) => "redis",
            CacheBackend::InMemory(_) => "in_memory",
        }
    }
}

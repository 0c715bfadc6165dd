//! Relaygate - LLM API gateway with channel routing and retry failover
//!
//! This library provides the core functionality for the Relaygate server.
//! Requests are routed across provider channels by group, model, priority
//! and weight; failed attempts are classified, rate-limited channels cooled
//! down and the request retried on channels it has not tried yet.

pub mod billing;
pub mod cache;
pub mod channel;
pub mod config;
pub mod control;
pub mod error;
pub mod middleware;
pub mod relay;
pub mod routes;
pub mod session;
pub mod streaming;
pub mod tokens;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

pub use crate::cache::{CacheBackend, InMemoryCache, RedisCache};
pub use crate::channel::{ChannelRegistry, CooldownTracker, WeightedSelector};
pub use crate::config::Config;
pub use crate::control::ControlPlaneClient;
pub use crate::relay::{AutoDisabler, OpenAiCompatibleProvider, RetryOrchestrator};
pub use crate::session::{SessionKeyRegistry, StickySessionManager};
pub use crate::tokens::SharedTokenCounter;

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    /// Sticky-session mappings and resolved tokens
    pub cache: CacheBackend,
    pub http_client: reqwest::Client,
    pub start_time: Instant,
    /// Control plane: channels, tokens, quota
    pub control: Arc<ControlPlaneClient>,
    pub registry: Arc<ChannelRegistry>,
    pub orchestrator: Arc<RetryOrchestrator>,
}

impl AppState {
    /// Create a new application state and load the routing table
    pub async fn new(config: Config) -> Result<Self> {
        // Initialize Redis connection
        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis = redis::aio::ConnectionManager::new(redis_client)
            .await
            .context("Failed to connect to Redis")?;
        let cache = CacheBackend::Redis(Arc::new(RedisCache::new(redis)));

        // Upstream calls stream for minutes; the retry ceiling bounds the rest
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(100)
            .timeout(std::time::Duration::from_secs(300))
            .build()?;

        let state = Self::assemble(config, cache, http_client);
        let loaded = state
            .registry
            .load()
            .await
            .context("Initial channel load failed")?;
        info!(channels = loaded, "Routing table loaded");

        Ok(state)
    }

    /// Wire every component around a cache backend and HTTP client
    fn assemble(config: Config, cache: CacheBackend, http_client: reqwest::Client) -> Self {
        let control = Arc::new(ControlPlaneClient::new(http_client.clone(), &config));
        let sessions = SessionKeyRegistry::with_defaults();

        let cooldowns = Arc::new(CooldownTracker::new(config.retry_cooldown_seconds));
        let sticky = Arc::new(StickySessionManager::new(cache.clone(), &config.sticky_options()));
        let selector = WeightedSelector::new(cooldowns.clone(), sticky, sessions.clone());
        let registry = Arc::new(ChannelRegistry::new(
            control.clone(),
            cooldowns,
            selector,
            config.registry_options(),
        ));

        let disabler = Arc::new(AutoDisabler::new(
            registry.clone(),
            control.clone(),
            sessions.clone(),
            config.disable_policy_options(),
        ));

        let orchestrator = Arc::new(RetryOrchestrator::new(
            registry.clone(),
            Arc::new(OpenAiCompatibleProvider::new(http_client.clone())),
            control.clone(),
            disabler,
            SharedTokenCounter::new(),
            sessions,
            config.retry_options(),
        ));

        Self {
            config,
            cache,
            http_client,
            start_time: Instant::now(),
            control,
            registry,
            orchestrator,
        }
    }

    /// Create an application state for testing
    ///
    /// Uses the in-memory cache instead of Redis; the control plane and
    /// upstream providers are expected to be mock servers.
    #[cfg(any(test, feature = "test-utils"))]
    pub async fn new_for_testing(config: Config) -> Result<Self> {
        let cache = CacheBackend::InMemory(Arc::new(InMemoryCache::new(10_000)));
        let state = Self::assemble(config, cache, reqwest::Client::new());
        state.registry.load().await?;
        Ok(state)
    }
}

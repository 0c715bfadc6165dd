//! Sticky-session store
//!
//! Maps (channel type, session hash) to the channel that last served the
//! session. The mapping is advisory: every store call is bounded by a short
//! timeout and any failure reads as "no affinity".

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::{
    cache::{redis::keys, CacheBackend},
    channel::{ChannelId, ChannelType},
    config::StickyOptions,
    error::AppResult,
};

/// Sticky-session mapping manager
pub struct StickySessionManager {
    backend: Option<CacheBackend>,
    ttl_seconds: u64,
    call_timeout: Duration,
}

impl StickySessionManager {
    /// Create a manager over the given cache backend
    pub fn new(backend: CacheBackend, options: &StickyOptions) -> Self {
        Self {
            backend: options.enabled.then_some(backend),
            ttl_seconds: options.ttl_seconds,
            call_timeout: options.call_timeout,
        }
    }

    /// Manager that never stores anything
    pub fn disabled() -> Self {
        Self {
            backend: None,
            ttl_seconds: 0,
            call_timeout: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Option<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(op, error = %e, "Sticky session store call failed");
                None
            }
            Err(_) => {
                warn!(op, timeout_ms = self.call_timeout.as_millis() as u64, "Sticky session store call timed out");
                None
            }
        }
    }

    /// Channel mapped to the session, if any
    pub async fn get(&self, session_hash: &str, channel_type: ChannelType) -> Option<ChannelId> {
        let backend = self.backend.as_ref()?;
        let key = keys::sticky_session(channel_type.as_str(), session_hash);

        self.bounded("get", backend.get::<ChannelId>(&key))
            .await
            .flatten()
            .filter(|id| *id > 0)
    }

    /// Map the session to a channel with the configured TTL
    pub async fn set(&self, session_hash: &str, channel_type: ChannelType, channel_id: ChannelId) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let key = keys::sticky_session(channel_type.as_str(), session_hash);

        if self
            .bounded("set", backend.set_with_ttl(&key, &channel_id, self.ttl_seconds))
            .await
            .is_some()
        {
            debug!(
                channel_id,
                channel_type = %channel_type,
                session = %preview(session_hash),
                "Stored sticky session"
            );
        }
    }

    /// Renew the mapping's TTL
    pub async fn extend_ttl(&self, session_hash: &str, channel_type: ChannelType) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let key = keys::sticky_session(channel_type.as_str(), session_hash);
        self.bounded("extend_ttl", backend.expire(&key, self.ttl_seconds))
            .await;
    }

    /// Drop the mapping
    pub async fn delete(&self, session_hash: &str, channel_type: ChannelType) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let key = keys::sticky_session(channel_type.as_str(), session_hash);

        if self.bounded("delete", backend.delete(&key)).await.is_some() {
            debug!(
                channel_type = %channel_type,
                session = %preview(session_hash),
                "Deleted stale sticky session"
            );
        }
    }
}

/// Log-safe prefix of a session hash
fn preview(session_hash: &str) -> &str {
    session_hash.get(..8).unwrap_or(session_hash)
}

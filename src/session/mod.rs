//! Session affinity
//!
//! A request that belongs to a recognisable client session should keep
//! landing on the channel that served it before. Recognition is per channel
//! type: each session-affine type registers a `SessionKeyDeriver`, and a type
//! without one never gets affinity.

pub mod fingerprint;
pub mod sticky;

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::Value;

use crate::channel::ChannelType;

pub use self::fingerprint::{ClaudeCodeSession, CodexSession, GeminiCliSession};
pub use self::sticky::StickySessionManager;

/// Request attributes available to fingerprint strategies
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Parsed request body
    pub body: Option<Arc<Value>>,
    pub user_agent: Option<String>,
    pub client_ip: Option<String>,
    /// Caller's API token
    pub api_key: String,
    /// `session_id` header, else `x-session-id`
    pub session_header: Option<String>,
}

impl SessionContext {
    /// Collect session attributes from an inbound request
    pub fn from_request(
        headers: &HeaderMap,
        client_ip: Option<String>,
        api_key: &str,
        body: Arc<Value>,
    ) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        // Proxies put the original client first in X-Forwarded-For
        let forwarded = header("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            .filter(|v| !v.is_empty());

        Self {
            body: Some(body),
            user_agent: header("user-agent"),
            client_ip: forwarded.or_else(|| header("x-real-ip")).or(client_ip),
            api_key: api_key.to_string(),
            session_header: header("session_id").or_else(|| header("x-session-id")),
        }
    }
}

/// Capability: derive a stable session key from a request
pub trait SessionKeyDeriver: Send + Sync {
    fn derive_session_key(&self, ctx: &SessionContext) -> Option<String>;
}

/// Type-keyed deriver table
#[derive(Clone, Default)]
pub struct SessionKeyRegistry {
    derivers: HashMap<ChannelType, Arc<dyn SessionKeyDeriver>>,
}

impl SessionKeyRegistry {
    /// Registry with no session-affine types
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in strategies
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(ChannelType::ClaudeCode, Arc::new(ClaudeCodeSession));
        registry.register(ChannelType::GeminiCli, Arc::new(GeminiCliSession));
        registry.register(ChannelType::Codex, Arc::new(CodexSession));
        registry
    }

    pub fn register(&mut self, channel_type: ChannelType, deriver: Arc<dyn SessionKeyDeriver>) {
        self.derivers.insert(channel_type, deriver);
    }

    /// Whether the channel type participates in sticky sessions
    pub fn is_affine(&self, channel_type: ChannelType) -> bool {
        self.derivers.contains_key(&channel_type)
    }

    /// Session key for the request under the given channel type
    pub fn derive(&self, channel_type: ChannelType, ctx: &SessionContext) -> Option<String> {
        self.derivers
            .get(&channel_type)
            .and_then(|d| d.derive_session_key(ctx))
    }
}

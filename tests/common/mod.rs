//! Common test utilities for Relaygate
//!
//! Shared fixtures and the full-stack harness used by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::http::{header, HeaderValue};
use axum_test::TestServer;
use serde_json::{json, Value};

use relaygate::{routes, AppState, Config};

use crate::mocks::{MockControlPlane, MockUpstream};

/// Test configuration constants
pub mod constants {
    /// Relay API key of the default test token
    pub const TEST_API_KEY: &str = "sk-relay-test-0123456789abcdef";
    pub const TEST_CONTROL_PLANE_KEY: &str = "test-control-plane-key";
    pub const TEST_ADMIN_KEY: &str = "test-admin-key";
    pub const TEST_GROUP: &str = "default";
    pub const TEST_MODEL: &str = "gpt-4o";
}

use constants::*;

/// Config pointing at a mock control plane
pub fn test_config(control_plane_url: &str) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        redis_url: "redis://localhost:6379".to_string(),
        sticky_sessions_enabled: true,
        control_plane_url: control_plane_url.to_string(),
        control_plane_api_key: TEST_CONTROL_PLANE_KEY.to_string(),
        admin_api_key: Some(TEST_ADMIN_KEY.to_string()),
        retry_times: 3,
        retry_timeout_seconds: 30,
        retry_cooldown_seconds: 60,
        default_channel_weight: 1,
        model_name_case_insensitive: false,
        channel_sync_seconds: 0,
        cooldown_sweep_seconds: 3600,
        sticky_session_ttl_seconds: 3600,
        sticky_store_timeout_ms: 200,
        auto_disable_enabled: true,
        auto_disable_auth_failures: 3,
        token_cache_ttl_seconds: 60,
        debug_enabled: false,
    }
}

/// Channel as served by the control plane
pub fn channel_json(id: i64, channel_type: &str, base_url: &str, priority: i64, weight: u32) -> Value {
    json!({
        "id": id,
        "name": format!("channel-{}", id),
        "type": channel_type,
        "group": TEST_GROUP,
        "models": format!("{},gpt-4o-mini", TEST_MODEL),
        "weight": weight,
        "priority": priority,
        "status": 1,
        "base_url": base_url,
        "key": format!("sk-upstream-{}", id)
    })
}

/// Token resolved for `TEST_API_KEY`
pub fn token_json() -> Value {
    json!({
        "id": 7,
        "userId": 42,
        "name": "integration",
        "userGroup": TEST_GROUP,
        "enabled": true
    })
}

pub fn chat_request(content: &str) -> Value {
    json!({
        "model": TEST_MODEL,
        "messages": [{"role": "user", "content": content}]
    })
}

pub fn streaming_chat_request(content: &str) -> Value {
    json!({
        "model": TEST_MODEL,
        "messages": [{"role": "user", "content": content}],
        "stream": true
    })
}

pub fn bearer(key: &str) -> HeaderValue {
    format!("Bearer {}", key).parse().unwrap()
}

/// Full application behind mock control plane and upstreams
///
/// Uses the in-memory cache, so no Redis is needed.
pub struct TestHarness {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub control: MockControlPlane,
    pub upstream: MockUpstream,
}

impl TestHarness {
    /// Start the mocks, serve `channels` and build the app
    ///
    /// `channels` receives the upstream mock so channel base URLs can point at it.
    pub async fn new(channels: impl FnOnce(&MockUpstream) -> Vec<Value>) -> Self {
        Self::with_config(channels, |_| {}).await
    }

    pub async fn with_config(
        channels: impl FnOnce(&MockUpstream) -> Vec<Value>,
        configure: impl FnOnce(&mut Config),
    ) -> Self {
        let control = MockControlPlane::start().await;
        let upstream = MockUpstream::start().await;

        control.mock_channels(&channels(&upstream)).await;
        control.mock_token(TEST_API_KEY, token_json()).await;
        control.mock_unknown_tokens().await;
        control.mock_quota_accepting().await;
        control.mock_disable_accepted().await;

        let mut config = test_config(&control.uri());
        configure(&mut config);

        let state = Arc::new(
            AppState::new_for_testing(config)
                .await
                .expect("Failed to build test state"),
        );
        let app = routes::create_router(state.clone());
        let server = TestServer::new(app).expect("Failed to create test server");

        Self {
            server,
            state,
            control,
            upstream,
        }
    }

    /// POST a chat completion with the default token
    pub async fn chat(&self, body: &Value) -> axum_test::TestResponse {
        self.server
            .post("/v1/chat/completions")
            .add_header(header::AUTHORIZATION, bearer(TEST_API_KEY))
            .json(body)
            .await
    }
}

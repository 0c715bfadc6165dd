//! Mock control plane for testing
//!
//! Provides wiremock-based mocks for the control plane endpoints:
//! - GET /api/v1/channels?status=enabled - Enabled channel list
//! - GET /api/v1/channels/{id} - Single channel
//! - POST /api/v1/channels/{id}/disable - Disable notification
//! - GET /api/v1/tokens/{sha256} - API token resolution
//! - POST/DELETE /api/v1/quota/reservations[/{id}[/settle]] - Quota ledger

use relaygate::middleware::auth::hash_token;
use serde_json::{json, Value};
use wiremock::{
    matchers::{header, method, path, path_regex, query_param},
    Mock, MockServer, ResponseTemplate,
};

use crate::common::constants::TEST_CONTROL_PLANE_KEY;

/// Mock control plane server wrapper
pub struct MockControlPlane {
    server: MockServer,
}

impl MockControlPlane {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub async fn received_requests(&self) -> Vec<wiremock::Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    async fn requests_matching(&self, verb: &str, predicate: impl Fn(&str) -> bool) -> Vec<wiremock::Request> {
        self.received_requests()
            .await
            .into_iter()
            .filter(|r| r.method.as_str() == verb && predicate(r.url.path()))
            .collect()
    }

    /// Quota reservations created
    pub async fn reservation_requests(&self) -> Vec<wiremock::Request> {
        self.requests_matching("POST", |p| p == "/api/v1/quota/reservations").await
    }

    /// Reservations settled (charged)
    pub async fn settle_requests(&self) -> Vec<wiremock::Request> {
        self.requests_matching("POST", |p| p.ends_with("/settle")).await
    }

    /// Reservations refunded
    pub async fn refund_requests(&self) -> Vec<wiremock::Request> {
        self.requests_matching("DELETE", |p| p.starts_with("/api/v1/quota/reservations/")).await
    }

    pub async fn disable_requests(&self) -> Vec<wiremock::Request> {
        self.requests_matching("POST", |p| p.ends_with("/disable")).await
    }

    // =========================================================================
    // Channels
    // =========================================================================

    pub async fn mock_channels(&self, channels: &[Value]) {
        Mock::given(method("GET"))
            .and(path("/api/v1/channels"))
            .and(query_param("status", "enabled"))
            .and(header("x-api-key", TEST_CONTROL_PLANE_KEY))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": channels,
            })))
            .mount(&self.server)
            .await;

        for channel in channels {
            let id = channel["id"].as_i64().unwrap_or_default();
            Mock::given(method("GET"))
                .and(path(format!("/api/v1/channels/{}", id)))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "success": true,
                    "data": channel,
                })))
                .mount(&self.server)
                .await;
        }
    }

    pub async fn mock_disable_accepted(&self) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/api/v1/channels/\d+/disable$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": null})))
            .mount(&self.server)
            .await;
    }

    // =========================================================================
    // Tokens
    // =========================================================================

    /// Resolve `api_key` to `token`
    pub async fn mock_token(&self, api_key: &str, token: Value) {
        let hash = hash_token(api_key);
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/tokens/{}", hash)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": token,
            })))
            .mount(&self.server)
            .await;
    }

    /// Any token not mocked explicitly is unknown
    pub async fn mock_unknown_tokens(&self) {
        Mock::given(method("GET"))
            .and(path_regex(r"^/api/v1/tokens/[0-9a-f]+$"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "success": false,
                "error": {"code": "NOT_FOUND", "message": "token not found"}
            })))
            .with_priority(10)
            .mount(&self.server)
            .await;
    }

    // =========================================================================
    // Quota
    // =========================================================================

    pub async fn mock_quota_accepting(&self) {
        Mock::given(method("POST"))
            .and(path("/api/v1/quota/reservations"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "success": true,
                "data": {"id": "res-1"},
            })))
            .mount(&self.server)
            .await;

        Mock::given(method("POST"))
            .and(path_regex(r"^/api/v1/quota/reservations/[^/]+/settle$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": null})))
            .mount(&self.server)
            .await;

        Mock::given(method("DELETE"))
            .and(path_regex(r"^/api/v1/quota/reservations/[^/]+$"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_quota_exhausted(&self) {
        Mock::given(method("POST"))
            .and(path("/api/v1/quota/reservations"))
            .respond_with(ResponseTemplate::new(402).set_body_json(json!({
                "success": false,
                "error": {"code": "INSUFFICIENT_QUOTA", "message": "quota exhausted"}
            })))
            .with_priority(1)
            .mount(&self.server)
            .await;
    }
}

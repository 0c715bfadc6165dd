//! Health and metrics endpoint integration tests
//!
//! - GET /health - Full health check with dependency status
//! - GET /health/ready - Readiness probe
//! - GET /health/live - Liveness probe
//! - GET /metrics - Prometheus exposition

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::Value;

use crate::common::{channel_json, TestHarness};

async fn harness() -> TestHarness {
    TestHarness::new(|upstream| vec![channel_json(1, "openai", &upstream.channel_url("one"), 0, 1)]).await
}

#[tokio::test]
async fn test_liveness() {
    let h = harness().await;

    let response = h.server.get("/health/live").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_health_reports_routing_table() {
    let h = harness().await;

    let response = h.server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["stats"]["channels"], 1);
    assert_eq!(body["stats"]["cache_backend"], "in_memory");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_readiness_requires_channels() {
    let h = harness().await;
    h.server.get("/health/ready").await.assert_status_ok();

    let empty = TestHarness::new(|_| Vec::new()).await;
    empty
        .server
        .get("/health/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    relaygate::routes::metrics::init_metrics();
    let h = harness().await;

    h.server.get("/metrics").await.assert_status_ok();
}

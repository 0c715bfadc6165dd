//! Admin endpoint integration tests

use axum::http::{header, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::Value;

use crate::common::{bearer, channel_json, constants::*, TestHarness};

async fn harness() -> TestHarness {
    TestHarness::new(|upstream| {
        vec![
            channel_json(1, "openai", &upstream.channel_url("one"), 0, 1),
            channel_json(2, "openai", &upstream.channel_url("two"), 0, 1),
        ]
    })
    .await
}

fn available_path() -> String {
    format!("/admin/groups/{}/models/{}/available", TEST_GROUP, TEST_MODEL)
}

#[tokio::test]
async fn test_admin_routes_hidden_without_key() {
    let h = TestHarness::with_config(
        |upstream| vec![channel_json(1, "openai", &upstream.channel_url("one"), 0, 1)],
        |config| config.admin_api_key = None,
    )
    .await;

    let response = h
        .server
        .post("/admin/channels/reload")
        .add_header(header::AUTHORIZATION, bearer(TEST_ADMIN_KEY))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_rejects_wrong_key() {
    let h = harness().await;

    let response = h
        .server
        .post("/admin/channels/reload")
        .add_header(header::AUTHORIZATION, bearer(TEST_API_KEY))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_reload_channels() {
    let h = harness().await;

    let response = h
        .server
        .post("/admin/channels/reload")
        .add_header(header::AUTHORIZATION, bearer(TEST_ADMIN_KEY))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["channels"], 2);
}

#[tokio::test]
async fn test_disable_and_enable_channel() {
    let h = harness().await;

    let available = |h: &TestHarness| {
        h.server
            .get(&available_path())
            .add_header(header::AUTHORIZATION, bearer(TEST_ADMIN_KEY))
    };

    let body: Value = available(&h).await.json();
    assert_eq!(body["available"], 2);

    let response = h
        .server
        .post("/admin/channels/1/disable")
        .add_header(header::AUTHORIZATION, bearer(TEST_ADMIN_KEY))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["enabled"], false);
    assert_eq!(body["persisted"], true);
    assert_eq!(h.control.disable_requests().await.len(), 1);

    let body: Value = available(&h).await.json();
    assert_eq!(body["available"], 1);

    h.server
        .post("/admin/channels/1/enable")
        .add_header(header::AUTHORIZATION, bearer(TEST_ADMIN_KEY))
        .await
        .assert_status_ok();

    let body: Value = available(&h).await.json();
    assert_eq!(body["available"], 2);
}

#[tokio::test]
async fn test_unknown_channel_not_found() {
    let h = harness().await;

    h.server
        .post("/admin/channels/999/disable")
        .add_header(header::AUTHORIZATION, bearer(TEST_ADMIN_KEY))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_group_models() {
    let h = harness().await;

    let response = h
        .server
        .get(&format!("/admin/groups/{}/models", TEST_GROUP))
        .add_header(header::AUTHORIZATION, bearer(TEST_ADMIN_KEY))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["models"], serde_json::json!(["gpt-4o", "gpt-4o-mini"]));
}

#[tokio::test]
async fn test_availability_for_unknown_model() {
    let h = harness().await;

    h.server
        .get(&format!("/admin/groups/{}/models/unknown/available", TEST_GROUP))
        .add_header(header::AUTHORIZATION, bearer(TEST_ADMIN_KEY))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

//! Relay endpoint integration tests
//!
//! Full request path: token auth, channel selection, upstream call,
//! failover, cooldown and per-attempt quota settlement.

use axum::http::{header, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::common::{bearer, channel_json, chat_request, constants::*, streaming_chat_request, TestHarness};

async fn two_tier_harness() -> TestHarness {
    TestHarness::new(|upstream| {
        vec![
            channel_json(1, "openai", &upstream.channel_url("primary"), 10, 1),
            channel_json(2, "openai", &upstream.channel_url("backup"), 0, 1),
        ]
    })
    .await
}

#[tokio::test]
async fn test_chat_completion_success() {
    let h = two_tier_harness().await;
    h.upstream.mock_chat_success("primary", "Hello there!", 12, 4).await;

    let response = h
        .server
        .post("/v1/chat/completions")
        .add_header(header::AUTHORIZATION, bearer(TEST_API_KEY))
        .add_header("x-request-id".parse().unwrap(), "req-success".parse().unwrap())
        .json(&chat_request("Hi"))
        .await;

    response.assert_status_ok();
    assert_eq!(response.header("x-request-id"), "req-success");
    let body: Value = response.json();
    assert_eq!(body["choices"][0]["message"]["content"], "Hello there!");

    assert_eq!(h.upstream.hits("primary").await, 1);
    assert_eq!(h.upstream.hits("backup").await, 0);

    let settles = h.control.settle_requests().await;
    assert_eq!(settles.len(), 1);
    let settled: Value = serde_json::from_slice(&settles[0].body).unwrap();
    assert_eq!(settled["promptTokens"], 12);
    assert_eq!(settled["completionTokens"], 4);
    assert!(h.control.refund_requests().await.is_empty());
}

#[tokio::test]
async fn test_upstream_receives_channel_credentials() {
    let h = two_tier_harness().await;
    h.upstream.mock_chat_success("primary", "ok", 1, 1).await;

    h.chat(&chat_request("Hi")).await.assert_status_ok();

    let sent = h.upstream.last_body("primary").await.unwrap();
    assert_eq!(sent["model"], TEST_MODEL);
    assert_eq!(sent["messages"][0]["content"], "Hi");
}

#[tokio::test]
async fn test_missing_authorization_rejected() {
    let h = two_tier_harness().await;

    let response = h.server.post("/v1/chat/completions").json(&chat_request("Hi")).await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(h.upstream.hits("primary").await, 0);
}

#[tokio::test]
async fn test_unknown_token_rejected() {
    let h = two_tier_harness().await;

    let response = h
        .server
        .post("/v1/chat/completions")
        .add_header(header::AUTHORIZATION, bearer("sk-unknown"))
        .json(&chat_request("Hi"))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "authentication_error");
}

#[tokio::test]
async fn test_disabled_token_rejected() {
    let h = two_tier_harness().await;
    h.control
        .mock_token("sk-disabled", json!({"id": 8, "userId": 42, "userGroup": TEST_GROUP, "enabled": false}))
        .await;

    let response = h
        .server
        .post("/v1/chat/completions")
        .add_header(header::AUTHORIZATION, bearer("sk-disabled"))
        .json(&chat_request("Hi"))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_token_resolution_cached() {
    let h = two_tier_harness().await;
    h.upstream.mock_chat_success("primary", "ok", 1, 1).await;

    h.chat(&chat_request("one")).await.assert_status_ok();
    h.chat(&chat_request("two")).await.assert_status_ok();

    let lookups = h
        .control
        .received_requests()
        .await
        .into_iter()
        .filter(|r| r.url.path().starts_with("/api/v1/tokens/"))
        .count();
    assert_eq!(lookups, 1);
}

#[tokio::test]
async fn test_failover_to_lower_tier() {
    let h = two_tier_harness().await;
    h.upstream.mock_chat_error("primary", 500, "internal failure").await;
    h.upstream.mock_chat_success("backup", "from backup", 10, 3).await;

    let response = h.chat(&chat_request("Hi")).await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["choices"][0]["message"]["content"], "from backup");

    assert_eq!(h.upstream.hits("primary").await, 1);
    assert_eq!(h.upstream.hits("backup").await, 1);

    // The failed attempt is refunded, the successful one charged
    assert_eq!(h.control.reservation_requests().await.len(), 2);
    assert_eq!(h.control.refund_requests().await.len(), 1);
    assert_eq!(h.control.settle_requests().await.len(), 1);
}

#[tokio::test]
async fn test_rate_limited_channel_cools_down() {
    let h = two_tier_harness().await;
    h.upstream.mock_chat_rate_limited("primary", 120).await;
    h.upstream.mock_chat_success("backup", "from backup", 10, 3).await;

    h.chat(&chat_request("first")).await.assert_status_ok();

    let cooldowns = h.state.registry.cooldowns();
    assert!(cooldowns.is_in_cooldown(1, TEST_MODEL));
    assert!(!cooldowns.is_in_cooldown(1, "gpt-4o-mini"));
    let remaining = cooldowns
        .remaining_at(1, TEST_MODEL, chrono::Utc::now().timestamp())
        .unwrap();
    assert!((115..=120).contains(&remaining), "remaining {}", remaining);

    // The cooled channel is skipped without being attempted
    h.chat(&chat_request("second")).await.assert_status_ok();
    assert_eq!(h.upstream.hits("primary").await, 1);
    assert_eq!(h.upstream.hits("backup").await, 2);
}

#[tokio::test]
async fn test_bad_request_not_retried() {
    let h = two_tier_harness().await;
    h.upstream.mock_chat_error("primary", 400, "messages: field required").await;
    h.upstream.mock_chat_success("backup", "unused", 1, 1).await;

    let response = h.chat(&chat_request("Hi")).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(h.upstream.hits("backup").await, 0);
}

#[tokio::test]
async fn test_exhausted_error_is_sanitized() {
    let h = two_tier_harness().await;
    h.upstream
        .mock_chat_error("primary", 502, "gateway broke (request id: upstream-abc)")
        .await;
    h.upstream
        .mock_chat_error("backup", 503, "backup broke (request id: upstream-def)")
        .await;

    let response = h
        .server
        .post("/v1/chat/completions")
        .add_header(header::AUTHORIZATION, bearer(TEST_API_KEY))
        .add_header("x-request-id".parse().unwrap(), "req-exhausted".parse().unwrap())
        .json(&chat_request("Hi"))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    let message = body["error"]["message"].as_str().unwrap();
    assert!(!message.contains("upstream-def"), "{}", message);
    assert!(message.ends_with("(request id: req-exhausted)"), "{}", message);

    assert_eq!(h.control.refund_requests().await.len(), 2);
}

#[tokio::test]
async fn test_disallowed_model_is_rejected_locally() {
    let h = two_tier_harness().await;
    h.control
        .mock_token(
            "sk-mini-only",
            json!({"id": 9, "userId": 42, "userGroup": TEST_GROUP, "allowedModels": ["gpt-4o-mini"]}),
        )
        .await;

    let response = h
        .server
        .post("/v1/chat/completions")
        .add_header(header::AUTHORIZATION, bearer("sk-mini-only"))
        .json(&chat_request("Hi"))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(h.upstream.hits("primary").await, 0);
    assert!(h.control.reservation_requests().await.is_empty());
}

#[tokio::test]
async fn test_unknown_model_has_no_channel() {
    let h = two_tier_harness().await;

    let response = h
        .chat(&json!({"model": "no-such-model", "messages": [{"role": "user", "content": "Hi"}]}))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert!(h.control.reservation_requests().await.is_empty());
}

#[tokio::test]
async fn test_insufficient_quota() {
    let h = two_tier_harness().await;
    h.control.mock_quota_exhausted().await;
    h.upstream.mock_chat_success("primary", "unused", 1, 1).await;

    let response = h.chat(&chat_request("Hi")).await;

    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(h.upstream.hits("primary").await, 0);
}

#[tokio::test]
async fn test_invalid_json_body() {
    let h = two_tier_harness().await;

    let response = h
        .server
        .post("/v1/chat/completions")
        .add_header(header::AUTHORIZATION, bearer(TEST_API_KEY))
        .add_header(header::CONTENT_TYPE, "application/json".parse().unwrap())
        .bytes("{not json".into())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_streaming_chat_completion() {
    let h = two_tier_harness().await;
    h.upstream.mock_chat_stream("primary", &["Hel", "lo", "!"]).await;

    let response = h.chat(&streaming_chat_request("Hi")).await;

    response.assert_status_ok();
    assert_eq!(response.header(header::CONTENT_TYPE), "text/event-stream");
    let body = response.text();
    assert!(body.contains("Hel"));
    assert!(body.contains("[DONE]"));

    let sent = h.upstream.last_body("primary").await.unwrap();
    assert_eq!(sent["stream_options"]["include_usage"], true);

    let settles = h.control.settle_requests().await;
    assert_eq!(settles.len(), 1);
    let settled: Value = serde_json::from_slice(&settles[0].body).unwrap();
    assert_eq!(settled["completionTokens"], 3);
    assert_eq!(settled["isStream"], true);
}

#[tokio::test]
async fn test_streaming_fails_over_before_first_byte() {
    let h = two_tier_harness().await;
    h.upstream.mock_chat_error("primary", 500, "internal failure").await;
    h.upstream.mock_chat_stream("backup", &["ok"]).await;

    let response = h.chat(&streaming_chat_request("Hi")).await;

    response.assert_status_ok();
    assert!(response.text().contains("[DONE]"));
    assert_eq!(h.upstream.hits("primary").await, 1);
    assert_eq!(h.upstream.hits("backup").await, 1);
}

#[tokio::test]
async fn test_models_lists_group_models() {
    let h = two_tier_harness().await;

    let response = h
        .server
        .get("/v1/models")
        .add_header(header::AUTHORIZATION, bearer(TEST_API_KEY))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["gpt-4o", "gpt-4o-mini"]);
}

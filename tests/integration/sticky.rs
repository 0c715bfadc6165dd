//! Sticky-session integration tests
//!
//! Session-affine channel types keep a conversation on one channel while
//! that channel stays usable.

use axum::http::header;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::common::{bearer, channel_json, constants::*, TestHarness};

fn conversation() -> Value {
    json!({
        "model": TEST_MODEL,
        "system": "You are a careful pair programmer.",
        "messages": [{"role": "user", "content": "Refactor the parser module"}]
    })
}

async fn affine_harness() -> TestHarness {
    let h = TestHarness::new(|upstream| {
        vec![
            channel_json(11, "claude_code", &upstream.channel_url("cc-a"), 0, 1),
            channel_json(12, "claude_code", &upstream.channel_url("cc-b"), 0, 1),
        ]
    })
    .await;
    h.upstream.mock_chat_success("cc-a", "from a", 20, 5).await;
    h.upstream.mock_chat_success("cc-b", "from b", 20, 5).await;
    h
}

#[tokio::test]
async fn test_same_session_routes_to_same_channel() {
    let h = affine_harness().await;

    for _ in 0..5 {
        h.chat(&conversation()).await.assert_status_ok();
    }

    let a = h.upstream.hits("cc-a").await;
    let b = h.upstream.hits("cc-b").await;
    assert_eq!(a + b, 5);
    assert!(a == 5 || b == 5, "session split across channels: a={} b={}", a, b);
}

#[tokio::test]
async fn test_disabled_sticky_channel_is_abandoned() {
    let h = affine_harness().await;

    h.chat(&conversation()).await.assert_status_ok();
    let (first_id, first_name, other_name) = if h.upstream.hits("cc-a").await == 1 {
        (11, "cc-a", "cc-b")
    } else {
        (12, "cc-b", "cc-a")
    };

    h.server
        .post(&format!("/admin/channels/{}/disable", first_id))
        .add_header(header::AUTHORIZATION, bearer(TEST_ADMIN_KEY))
        .await
        .assert_status_ok();

    h.chat(&conversation()).await.assert_status_ok();
    h.chat(&conversation()).await.assert_status_ok();

    assert_eq!(h.upstream.hits(first_name).await, 1);
    assert_eq!(h.upstream.hits(other_name).await, 2);
}

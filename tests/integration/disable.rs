//! Auto-disable integration tests
//!
//! Channels whose credentials keep failing are taken out of rotation and
//! the control plane is told about it.

use pretty_assertions::assert_eq;

use crate::common::{channel_json, chat_request, constants::*, TestHarness};

#[tokio::test]
async fn test_repeated_auth_failures_disable_channel() {
    let h = TestHarness::new(|upstream| {
        vec![
            channel_json(21, "openai", &upstream.channel_url("revoked"), 10, 1),
            channel_json(22, "openai", &upstream.channel_url("healthy"), 0, 1),
        ]
    })
    .await;
    h.upstream.mock_chat_error("revoked", 401, "Incorrect API key provided").await;
    h.upstream.mock_chat_success("healthy", "ok", 5, 1).await;

    for _ in 0..3 {
        h.chat(&chat_request("Hi")).await.assert_status_ok();
    }

    // Disabling runs in the background after the failed attempt
    let mut disabled = false;
    for _ in 0..50 {
        if h.state.registry.count_available_channels(TEST_GROUP, TEST_MODEL, &[]) == 1 {
            disabled = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(disabled, "channel 21 was not disabled");

    let before = h.upstream.hits("revoked").await;
    h.chat(&chat_request("Hi")).await.assert_status_ok();
    assert_eq!(h.upstream.hits("revoked").await, before);
    assert!(!h.control.disable_requests().await.is_empty());
}

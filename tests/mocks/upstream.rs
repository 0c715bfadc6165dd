//! Mock OpenAI-compatible upstream for testing
//!
//! One wiremock server hosts every test channel; each channel gets its own
//! path prefix (`/{name}`) so responses and hit counts stay per channel.

use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub struct MockUpstream {
    server: MockServer,
}

impl MockUpstream {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL to configure on the channel called `name`
    pub fn channel_url(&self, name: &str) -> String {
        format!("{}/{}", self.server.uri(), name)
    }

    fn chat_path(name: &str) -> String {
        format!("/{}/v1/chat/completions", name)
    }

    /// Requests received by the channel called `name`
    pub async fn hits(&self, name: &str) -> usize {
        let prefix = format!("/{}/", name);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path().starts_with(&prefix))
            .count()
    }

    pub async fn last_body(&self, name: &str) -> Option<serde_json::Value> {
        let prefix = format!("/{}/", name);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path().starts_with(&prefix))
            .last()
            .and_then(|r| serde_json::from_slice(&r.body).ok())
    }

    pub async fn mock_chat_success(&self, name: &str, content: &str, prompt_tokens: u32, completion_tokens: u32) {
        Mock::given(method("POST"))
            .and(path(Self::chat_path(name)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": format!("chatcmpl-{}", name),
                "object": "chat.completion",
                "created": 1706745600,
                "model": "gpt-4o",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": content},
                    "finish_reason": "stop"
                }],
                "usage": {
                    "prompt_tokens": prompt_tokens,
                    "completion_tokens": completion_tokens,
                    "total_tokens": prompt_tokens + completion_tokens
                }
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_chat_error(&self, name: &str, status: u16, message: &str) {
        Mock::given(method("POST"))
            .and(path(Self::chat_path(name)))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": {
                    "message": message,
                    "type": "upstream_error",
                    "code": null
                }
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_chat_rate_limited(&self, name: &str, retry_after_secs: u64) {
        Mock::given(method("POST"))
            .and(path(Self::chat_path(name)))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", retry_after_secs.to_string().as_str())
                    .set_body_json(json!({
                        "error": {"message": "rate limit reached", "type": "rate_limit_error"}
                    })),
            )
            .mount(&self.server)
            .await;
    }

    /// Streamed chat completion spelling out `words`
    pub async fn mock_chat_stream(&self, name: &str, words: &[&str]) {
        let mut body = String::new();
        for word in words {
            let chunk = json!({
                "id": format!("chatcmpl-{}", name),
                "object": "chat.completion.chunk",
                "choices": [{"index": 0, "delta": {"content": word}, "finish_reason": null}]
            });
            body.push_str(&format!("data: {}\n\n", chunk));
        }
        let usage = json!({
            "id": format!("chatcmpl-{}", name),
            "object": "chat.completion.chunk",
            "choices": [],
            "usage": {"prompt_tokens": 9, "completion_tokens": words.len(), "total_tokens": 9 + words.len()}
        });
        body.push_str(&format!("data: {}\n\n", usage));
        body.push_str("data: [DONE]\n\n");

        Mock::given(method("POST"))
            .and(path(Self::chat_path(name)))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&self.server)
            .await;
    }
}

//! OpenAI-compatible passthrough provider
//!
//! Forwards the request body to `{base_url}{endpoint}` with the channel key,
//! renaming the model per the channel mapping. Streaming responses are piped
//! chunk by chunk into the response sink while the text and usage are
//! collected for billing.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use crate::{
    billing::Usage,
    channel::Channel,
    streaming::{completion_text, value_as_string, StreamAccumulator},
};

use super::provider::{Completion, Provider, RelayRequest, ResponseSink, UpstreamError};

/// Unix timestamp at which a unified rate limit resets
const UNIFIED_RESET_HEADER: &str = "anthropic-ratelimit-unified-reset";

pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn url(channel: &Channel, request: &RelayRequest) -> Result<String, UpstreamError> {
        let base = channel
            .base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                UpstreamError::local(500, format!("channel {} has no base url", channel.id))
            })?;
        Ok(format!("{}{}", base, request.endpoint.path()))
    }

    fn headers(channel: &Channel) -> Result<HeaderMap, UpstreamError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {}", channel.key)).map_err(|_| {
            UpstreamError::local(500, format!("channel {} key is not a valid header value", channel.id))
        })?;
        headers.insert(AUTHORIZATION, auth);
        Ok(headers)
    }

    /// Body as sent upstream: mapped model, usage reporting on chat streams
    fn upstream_body(channel: &Channel, request: &RelayRequest) -> Value {
        let mut body = (*request.body).clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert(
                "model".to_string(),
                Value::String(channel.mapped_model(&request.model).to_string()),
            );
            if request.stream && request.endpoint.is_chat() {
                let options = obj
                    .entry("stream_options")
                    .or_insert_with(|| Value::Object(Default::default()));
                if let Some(options) = options.as_object_mut() {
                    options.insert("include_usage".to_string(), Value::Bool(true));
                }
            }
        }
        body
    }

    async fn error_from_response(channel: &Channel, response: reqwest::Response) -> UpstreamError {
        let status = response.status().as_u16();
        let reset_at = rate_limit_reset_at(response.headers(), chrono::Utc::now().timestamp());
        let text = response.text().await.unwrap_or_default();

        let mut err = match serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.get("error").cloned())
        {
            Some(envelope) => {
                let message = envelope
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| envelope.to_string());
                let mut err = UpstreamError::upstream(status, message, channel.channel_type);
                if let Some(error_type) = envelope.get("type").and_then(Value::as_str) {
                    err.error_type = error_type.to_string();
                }
                err.code = envelope.get("code").and_then(value_as_string);
                err.param = envelope
                    .get("param")
                    .or_else(|| envelope.get("status"))
                    .and_then(value_as_string);
                err
            }
            None => {
                let message = if text.trim().is_empty() {
                    format!("bad response status code {}", status)
                } else {
                    text
                };
                let mut err = UpstreamError::upstream(status, message, channel.channel_type);
                err.code = Some("bad_response_status_code".to_string());
                err.param = Some(status.to_string());
                err
            }
        };
        err.rate_limit_reset_at = reset_at;
        err
    }

    async fn read_body(channel: &Channel, response: reqwest::Response) -> Result<Completion, UpstreamError> {
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| {
            UpstreamError::upstream(502, format!("failed to read upstream body: {}", e), channel.channel_type)
                .with_type("request_error")
        })?;

        let (usage, output_text) = match serde_json::from_slice::<Value>(&bytes) {
            Ok(body) => (
                body.get("usage")
                    .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok()),
                completion_text(&body),
            ),
            Err(_) => (None, String::new()),
        };

        Ok(Completion {
            status,
            body: Some(bytes),
            usage,
            output_text,
        })
    }

    async fn pipe_stream(
        channel: &Channel,
        response: reqwest::Response,
        sink: &ResponseSink,
    ) -> Result<Completion, UpstreamError> {
        let status = response.status().as_u16();
        let mut accumulator = StreamAccumulator::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(channel_id = channel.id, error = %e, "Upstream stream interrupted");
                    let (text, usage) = accumulator.into_parts();
                    let mut err = UpstreamError::upstream(
                        502,
                        format!("upstream stream interrupted: {}", e),
                        channel.channel_type,
                    )
                    .with_type("request_error");
                    err.output_text = text;
                    err.usage = usage;
                    err.delivered = sink.has_delivered();
                    return Err(err);
                }
            };

            accumulator.feed(&chunk);
            if let Some(stream_err) = accumulator.error().cloned() {
                let status = stream_err
                    .code
                    .as_deref()
                    .and_then(|c| c.parse::<u16>().ok())
                    .filter(|c| (400..600).contains(c))
                    .unwrap_or(500);
                let (text, usage) = accumulator.into_parts();
                let mut err = UpstreamError::upstream(status, stream_err.message, channel.channel_type);
                if let Some(error_type) = stream_err.error_type {
                    err.error_type = error_type;
                }
                err.code = stream_err.code;
                err.output_text = text;
                err.usage = usage;
                err.delivered = sink.has_delivered();
                return Err(err);
            }

            // Skipped writes (caller gone) do not stop the upstream read
            sink.send(chunk).await;
        }

        let (output_text, usage) = accumulator.into_parts();
        Ok(Completion {
            status,
            body: None,
            usage,
            output_text,
        })
    }
}

/// Provider-announced reset time as a unix timestamp
pub fn rate_limit_reset_at(headers: &HeaderMap, now: i64) -> Option<i64> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    header(UNIFIED_RESET_HEADER)
        .filter(|ts| *ts > 0)
        .or_else(|| header("retry-after").filter(|s| *s > 0).map(|s| now.saturating_add(s)))
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &'static str {
        "openai_compatible"
    }

    #[instrument(skip_all, fields(channel_id = channel.id, endpoint = request.endpoint.as_str(), stream = request.stream))]
    async fn send(
        &self,
        channel: &Channel,
        request: &RelayRequest,
        sink: &ResponseSink,
    ) -> Result<Completion, UpstreamError> {
        let url = Self::url(channel, request)?;
        let headers = Self::headers(channel)?;
        let body = Self::upstream_body(channel, request);

        debug!(url = %url, model = %request.model, "Sending request to upstream");

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(url = %url, error = %e, "Failed to reach upstream");
                let status = if e.is_timeout() { 504 } else { 502 };
                UpstreamError::upstream(status, format!("upstream request failed: {}", e), channel.channel_type)
                    .with_type("request_error")
            })?;

        let status = response.status();
        debug!(url = %url, status = %status, "Received response from upstream");

        if !status.is_success() {
            return Err(Self::error_from_response(channel, response).await);
        }

        if request.stream {
            Self::pipe_stream(channel, response, sink).await
        } else {
            Self::read_body(channel, response).await
        }
    }
}

//! Upstream provider abstraction
//!
//! A provider performs one attempt against one channel. It streams response
//! bytes into a `ResponseSink` and reports failures as a typed
//! `UpstreamError` the classifier can reason about.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    billing::Usage,
    channel::{Channel, ChannelType},
};

/// Relayed API surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEndpoint {
    ChatCompletions,
    Completions,
    Embeddings,
}

impl RelayEndpoint {
    /// Upstream path appended to the channel base URL
    pub fn path(&self) -> &'static str {
        match self {
            RelayEndpoint::ChatCompletions => "/v1/chat/completions",
            RelayEndpoint::Completions => "/v1/completions",
            RelayEndpoint::Embeddings => "/v1/embeddings",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelayEndpoint::ChatCompletions => "chat_completions",
            RelayEndpoint::Completions => "completions",
            RelayEndpoint::Embeddings => "embeddings",
        }
    }

    pub fn is_chat(&self) -> bool {
        matches!(self, RelayEndpoint::ChatCompletions)
    }
}

/// One inbound request to relay
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub endpoint: RelayEndpoint,
    /// Model as requested by the caller
    pub model: String,
    pub body: Arc<Value>,
    pub stream: bool,
    pub request_id: String,
}

impl RelayRequest {
    pub fn new(endpoint: RelayEndpoint, body: Value, request_id: impl Into<String>) -> Self {
        let model = body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

        Self {
            endpoint,
            model,
            body: Arc::new(body),
            stream,
            request_id: request_id.into(),
        }
    }
}

/// Successful attempt
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub status: u16,
    /// Full body for non-streaming responses; streamed bytes went to the sink
    pub body: Option<Bytes>,
    /// Usage reported by the upstream, if any
    pub usage: Option<Usage>,
    /// Generated text, for estimating completion tokens when usage is missing
    pub output_text: String,
}

/// Failed attempt as reported by a provider
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamError {
    pub status: u16,
    pub message: String,
    pub error_type: String,
    pub code: Option<String>,
    pub param: Option<String>,
    /// Client or configuration fault: never retried, never cooled down
    pub is_local: bool,
    /// Provider-announced rate-limit reset (unix seconds)
    pub rate_limit_reset_at: Option<i64>,
    pub channel_type: ChannelType,
    /// Usage reported before the failure, if any
    pub usage: Option<Usage>,
    /// Text produced before the failure
    pub output_text: String,
    /// Bytes already reached the client
    pub delivered: bool,
}

impl UpstreamError {
    /// Error raised by the gateway itself
    pub fn local(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error_type: "relaygate_error".to_string(),
            code: None,
            param: None,
            is_local: true,
            rate_limit_reset_at: None,
            channel_type: ChannelType::Other,
            usage: None,
            output_text: String::new(),
            delivered: false,
        }
    }

    /// Error returned by (or while talking to) an upstream
    pub fn upstream(status: u16, message: impl Into<String>, channel_type: ChannelType) -> Self {
        Self {
            status,
            message: message.into(),
            error_type: "upstream_api_error".to_string(),
            code: None,
            param: None,
            is_local: false,
            rate_limit_reset_at: None,
            channel_type,
            usage: None,
            output_text: String::new(),
            delivered: false,
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    pub fn with_reset_at(mut self, reset_at: Option<i64>) -> Self {
        self.rate_limit_reset_at = reset_at;
        self
    }

    pub fn is_auth_failure(&self) -> bool {
        self.status == 401 || self.status == 403
    }
}

/// Where response bytes for the caller go
///
/// Each write first checks whether the caller is still listening; once it
/// has gone, writes are skipped but the attempt itself keeps running.
#[derive(Clone)]
pub struct ResponseSink {
    tx: Option<mpsc::Sender<Bytes>>,
    delivered: Arc<AtomicBool>,
}

impl ResponseSink {
    /// Sink connected to a streaming response
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                tx: Some(tx),
                delivered: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Sink that discards everything (non-streaming requests)
    pub fn detached() -> Self {
        Self {
            tx: None,
            delivered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Forward a chunk; returns false if it was skipped
    pub async fn send(&self, chunk: Bytes) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        if tx.is_closed() {
            return false;
        }
        match tx.send(chunk).await {
            Ok(()) => {
                self.delivered.store(true, Ordering::Release);
                true
            }
            Err(_) => false,
        }
    }

    /// Whether any byte has reached the caller
    pub fn has_delivered(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false)
    }
}

/// Upstream provider
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logging and metrics
    fn name(&self) -> &'static str;

    /// Perform one attempt against `channel`
    async fn send(
        &self,
        channel: &Channel,
        request: &RelayRequest,
        sink: &ResponseSink,
    ) -> Result<Completion, UpstreamError>;
}

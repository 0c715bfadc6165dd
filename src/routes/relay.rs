//! Relay endpoints
//!
//! OpenAI-compatible chat completions, completions and embeddings. Each
//! request runs through the retry orchestrator; streaming requests switch to
//! SSE as soon as the first upstream chunk arrives.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::{
    error::AppError,
    middleware::auth::AuthenticatedToken,
    relay::{RelayEndpoint, RelayOutcome, RelayRequest, ResponseSink},
    routes::metrics::record_request,
    session::SessionContext,
    streaming, AppState,
};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Buffered chunks between the provider and the client connection
const STREAM_BUFFER: usize = 64;

pub async fn chat_completions(
    state: State<Arc<AppState>>,
    auth: Extension<AuthenticatedToken>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    relay(state, auth, connect, headers, body, RelayEndpoint::ChatCompletions).await
}

pub async fn completions(
    state: State<Arc<AppState>>,
    auth: Extension<AuthenticatedToken>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    relay(state, auth, connect, headers, body, RelayEndpoint::Completions).await
}

pub async fn embeddings(
    state: State<Arc<AppState>>,
    auth: Extension<AuthenticatedToken>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    relay(state, auth, connect, headers, body, RelayEndpoint::Embeddings).await
}

/// Caller-supplied request id, else a fresh one
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())
}

fn outcome_label(outcome: &RelayOutcome) -> &'static str {
    match &outcome.result {
        Ok(_) => "success",
        Err(failure) => failure.reason.as_str(),
    }
}

async fn relay(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedToken>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
    endpoint: RelayEndpoint,
) -> Result<Response, AppError> {
    let start_time = Instant::now();

    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?;
    if !value.is_object() {
        return Err(AppError::BadRequest("request body must be a JSON object".to_string()));
    }

    let request = RelayRequest::new(endpoint, value, request_id(&headers));
    let client_ip = connect.map(|ConnectInfo(addr)| addr.ip().to_string());
    let session = SessionContext::from_request(&headers, client_ip, &auth.api_key, request.body.clone());

    info!(
        request_id = %request.request_id,
        model = %request.model,
        endpoint = endpoint.as_str(),
        stream = request.stream,
        token_id = auth.token.id,
        "Processing relay request"
    );

    if request.stream {
        return stream_relay(state, auth, request, session, start_time).await;
    }

    let outcome = state
        .orchestrator
        .relay(&auth.token, &request, Some(&session), &ResponseSink::detached())
        .await;
    let duration = start_time.elapsed().as_secs_f64();
    record_request(endpoint.as_str(), outcome_label(&outcome), &request.model, duration);

    info!(
        request_id = %request.request_id,
        attempts = outcome.attempts.len(),
        channel_id = ?outcome.last_channel(),
        duration_ms = %format!("{:.2}", duration * 1000.0),
        "Relay request completed"
    );

    match outcome.result {
        Ok(completion) => json_response(completion.status, completion.body, &request.request_id),
        Err(failure) => Err(failure.error),
    }
}

fn json_response(status: u16, body: Option<Bytes>, request_id: &str) -> Result<Response, AppError> {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.unwrap_or_default()))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build response: {}", e)))?;

    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    Ok(response)
}

/// Streaming relay
///
/// The orchestrator runs in its own task and writes to the sink. Until the
/// first chunk arrives the request can still fail as plain JSON; after that
/// the response is committed and a failure becomes an SSE error frame.
async fn stream_relay(
    state: Arc<AppState>,
    auth: AuthenticatedToken,
    request: RelayRequest,
    session: SessionContext,
    start_time: Instant,
) -> Result<Response, AppError> {
    let (sink, mut rx) = ResponseSink::channel(STREAM_BUFFER);
    let (done_tx, done_rx) = oneshot::channel::<RelayOutcome>();

    let orchestrator = state.orchestrator.clone();
    let task_request = request.clone();
    tokio::spawn(async move {
        let outcome = orchestrator
            .relay(&auth.token, &task_request, Some(&session), &sink)
            .await;
        // Closing the sink before reporting lets the reader drain first
        drop(sink);
        let _ = done_tx.send(outcome);
    });

    let endpoint = request.endpoint.as_str();
    let model = request.model.clone();

    // The sink is dropped before the outcome is sent, so `None` means done
    let Some(first) = rx.recv().await else {
        let outcome = done_rx
            .await
            .map_err(|_| AppError::Internal(anyhow::anyhow!("relay task ended without an outcome")))?;
        record_request(endpoint, outcome_label(&outcome), &model, start_time.elapsed().as_secs_f64());
        return match outcome.result {
            Ok(completion) => sse_response(Body::from(completion.body.unwrap_or_default()), &request.request_id),
            Err(failure) => Err(failure.error),
        };
    };

    let request_id = request.request_id.clone();
    let stream = async_stream::stream! {
        yield Ok::<Bytes, std::convert::Infallible>(first);
        while let Some(chunk) = rx.recv().await {
            yield Ok(chunk);
        }

        match done_rx.await {
            Ok(outcome) => {
                record_request(endpoint, outcome_label(&outcome), &model, start_time.elapsed().as_secs_f64());
                if let Err(failure) = outcome.result {
                    warn!(
                        request_id = %request_id,
                        reason = failure.reason.as_str(),
                        "Stream failed after output was sent"
                    );
                    let body = failure.error.body();
                    yield Ok(Bytes::from(streaming::error_frame(&body.message, &body.error_type, &body.code)));
                }
            }
            Err(_) => warn!(request_id = %request_id, "Relay task ended without an outcome"),
        }
    };

    sse_response(Body::from_stream(stream), &request.request_id)
}

fn sse_response(body: Body, request_id: &str) -> Result<Response, AppError> {
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build response: {}", e)))?;

    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    Ok(response.into_response())
}

//! Prometheus metrics endpoint
//!
//! Exposes application metrics in Prometheus format for monitoring.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
});

/// Initialize metrics (call once at startup)
pub fn init_metrics() {
    let _ = &*PROMETHEUS_HANDLE;
    register_metrics();
}

fn register_metrics() {
    metrics::describe_counter!(
        "relaygate_requests_total",
        "Relay requests by endpoint, outcome and model"
    );
    metrics::describe_histogram!(
        "relaygate_request_duration_seconds",
        "Relay request duration in seconds, retries included"
    );
    metrics::describe_counter!(
        "relaygate_retry_events_total",
        "Retry lifecycle events by event name"
    );
    metrics::describe_counter!(
        "relaygate_channel_cooldowns_total",
        "Channel/model pairs put into cooldown"
    );
    metrics::describe_counter!(
        "relaygate_channels_disabled_total",
        "Channels disabled, automatically or by an operator"
    );
    metrics::describe_counter!(
        "relaygate_tokens_processed_total",
        "Tokens billed per model"
    );
    metrics::describe_counter!(
        "relaygate_cache_operations_total",
        "Token cache lookups by result"
    );
}

/// Prometheus metrics endpoint handler
pub async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE.render()
}

/// Record a finished relay request
pub fn record_request(endpoint: &str, outcome: &str, model: &str, duration_secs: f64) {
    metrics::counter!(
        "relaygate_requests_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome.to_string(),
        "model" => model.to_string()
    )
    .increment(1);
    metrics::histogram!("relaygate_request_duration_seconds", "model" => model.to_string())
        .record(duration_secs);
}

/// Record cache operation
pub fn record_cache_operation(operation: &str, result: &str) {
    metrics::counter!(
        "relaygate_cache_operations_total",
        "operation" => operation.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

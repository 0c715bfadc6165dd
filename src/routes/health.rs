//! Health check endpoints
//!
//! Provides endpoints for monitoring and container orchestration:
//! - `/health` - Full health check with dependency status
//! - `/health/ready` - Readiness probe
//! - `/health/live` - Liveness probe

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

/// Health status enum
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual dependency check result
#[derive(Debug, Serialize)]
pub struct DependencyCheck {
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Dependency checks collection
#[derive(Debug, Serialize)]
pub struct DependencyChecks {
    pub cache: DependencyCheck,
    pub channels: DependencyCheck,
}

/// Routing statistics
#[derive(Debug, Serialize)]
pub struct HealthStats {
    pub uptime_seconds: u64,
    pub channels: usize,
    pub cooldowns: usize,
    pub cache_backend: &'static str,
}

/// Full health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: String,
    pub checks: DependencyChecks,
    pub stats: HealthStats,
}

/// Simple health response for liveness/readiness
#[derive(Debug, Serialize)]
pub struct SimpleHealthResponse {
    pub status: HealthStatus,
}

async fn check_cache(state: &AppState) -> DependencyCheck {
    let start = Instant::now();
    match state.cache.ping().await {
        Ok(()) => DependencyCheck {
            status: HealthStatus::Healthy,
            latency_ms: start.elapsed().as_millis() as u64,
            error: None,
        },
        // Sticky sessions degrade to plain weighted selection without the cache
        Err(e) => DependencyCheck {
            status: HealthStatus::Degraded,
            latency_ms: start.elapsed().as_millis() as u64,
            error: Some(e.to_string()),
        },
    }
}

fn check_channels(channels: usize) -> DependencyCheck {
    if channels > 0 {
        DependencyCheck {
            status: HealthStatus::Healthy,
            latency_ms: 0,
            error: None,
        }
    } else {
        DependencyCheck {
            status: HealthStatus::Unhealthy,
            latency_ms: 0,
            error: Some("routing table is empty".to_string()),
        }
    }
}

fn overall(checks: &DependencyChecks) -> HealthStatus {
    let statuses = [&checks.cache.status, &checks.channels.status];
    if statuses.contains(&&HealthStatus::Unhealthy) {
        HealthStatus::Unhealthy
    } else if statuses.contains(&&HealthStatus::Degraded) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Full health check endpoint
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let channels = state.registry.snapshot().channel_count();
    let checks = DependencyChecks {
        cache: check_cache(&state).await,
        channels: check_channels(channels),
    };
    let status = overall(&checks);
    let uptime = state.start_time.elapsed().as_secs();

    let status_code = match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks,
        stats: HealthStats {
            uptime_seconds: uptime,
            channels,
            cooldowns: state.registry.cooldowns().len(),
            cache_backend: state.cache.kind(),
        },
    };

    (status_code, Json(response))
}

/// Readiness probe endpoint
///
/// Ready once the routing table holds at least one channel.
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<SimpleHealthResponse>) {
    if state.registry.snapshot().channel_count() == 0 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(SimpleHealthResponse {
                status: HealthStatus::Unhealthy,
            }),
        );
    }

    (
        StatusCode::OK,
        Json(SimpleHealthResponse {
            status: HealthStatus::Healthy,
        }),
    )
}

/// Liveness probe endpoint
pub async fn liveness_check() -> (StatusCode, Json<SimpleHealthResponse>) {
    (
        StatusCode::OK,
        Json(SimpleHealthResponse {
            status: HealthStatus::Healthy,
        }),
    )
}

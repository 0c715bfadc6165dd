//! HTTP routes for Relaygate
//!
//! This module defines all HTTP endpoints exposed by the gateway.

pub mod admin;
pub mod health;
pub mod metrics;
pub mod models;
pub mod relay;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    middleware::auth::{admin_middleware, auth_middleware},
    AppState,
};

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Routes that require an API token
    let relay_routes = Router::new()
        .route("/v1/chat/completions", post(relay::chat_completions))
        .route("/v1/completions", post(relay::completions))
        .route("/v1/embeddings", post(relay::embeddings))
        .route("/v1/models", get(models::list_models))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/admin/channels/reload", post(admin::reload_channels))
        .route("/admin/channels/:id/enable", post(admin::enable_channel))
        .route("/admin/channels/:id/disable", post(admin::disable_channel))
        .route("/admin/groups/:group/models", get(admin::group_models))
        .route(
            "/admin/groups/:group/models/:model/available",
            get(admin::available_channels),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_middleware,
        ));

    // Public routes (health checks, metrics) - no auth required
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/health/live", get(health::liveness_check))
        .route("/metrics", get(metrics::prometheus_metrics));

    Router::new()
        .merge(public_routes)
        .merge(relay_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

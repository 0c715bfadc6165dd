//! Admin endpoints
//!
//! Operator controls over the in-memory routing table. Guarded by
//! `admin_middleware`; absent when no admin key is configured.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    channel::ChannelId,
    error::{AppError, AppResult},
    relay::{events, ChannelDisabler},
    AppState,
};

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub channels: usize,
}

#[derive(Debug, Serialize)]
pub struct ChannelStateResponse {
    pub id: ChannelId,
    pub enabled: bool,
    /// Whether the control plane recorded the change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct GroupModelsResponse {
    pub group: String,
    pub models: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub group: String,
    /// Requested model
    pub model: String,
    /// Table entry the model resolved to
    pub matched_model: String,
    pub available: usize,
}

/// Rebuild the routing table from the control plane
pub async fn reload_channels(State(state): State<Arc<AppState>>) -> AppResult<Json<ReloadResponse>> {
    let channels = state.registry.load().await?;
    info!(channels, "Routing table reloaded by operator");
    Ok(Json(ReloadResponse { channels }))
}

pub async fn enable_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ChannelId>,
) -> AppResult<Json<ChannelStateResponse>> {
    if !state.registry.enable(id) {
        return Err(AppError::NotFound(format!("channel {}", id)));
    }
    info!(channel_id = id, "Channel enabled by operator");
    Ok(Json(ChannelStateResponse {
        id,
        enabled: true,
        persisted: None,
    }))
}

/// Disable a channel locally, then record it with the control plane
pub async fn disable_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ChannelId>,
) -> AppResult<Json<ChannelStateResponse>> {
    let channel = state
        .registry
        .channel(id)
        .ok_or_else(|| AppError::NotFound(format!("channel {}", id)))?;

    state.registry.disable(id);
    events::channel_disabled(id, &channel.name, channel.channel_type, 0, "disabled by operator", false);

    let persisted = match state
        .control
        .disable_channel(id, &channel.name, "disabled by operator", false)
        .await
    {
        Ok(()) => true,
        Err(e) => {
            warn!(channel_id = id, error = %e, "Control plane did not record the disable");
            false
        }
    };

    Ok(Json(ChannelStateResponse {
        id,
        enabled: false,
        persisted: Some(persisted),
    }))
}

pub async fn group_models(
    State(state): State<Arc<AppState>>,
    Path(group): Path<String>,
) -> Json<GroupModelsResponse> {
    let models = state.registry.group_models(&group);
    Json(GroupModelsResponse { group, models })
}

/// Channels that could serve the model right now
pub async fn available_channels(
    State(state): State<Arc<AppState>>,
    Path((group, model)): Path<(String, String)>,
) -> AppResult<Json<AvailabilityResponse>> {
    let matched_model = state
        .registry
        .matched_model_name(&group, &model)
        .map_err(|e| AppError::NotFound(e.to_string()))?;
    let available = state
        .registry
        .count_available_channels(&group, &matched_model, &[]);

    Ok(Json(AvailabilityResponse {
        group,
        model,
        matched_model,
        available,
    }))
}

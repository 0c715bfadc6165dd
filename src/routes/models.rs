//! Models endpoint
//!
//! Lists the models the caller's routing groups can serve.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::{Deserialize, Serialize};

use crate::{error::AppResult, middleware::auth::AuthenticatedToken, AppState};

/// Model information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

/// Models list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<Model>,
}

/// List available models
///
/// Union of the models configured in the token's group chain, narrowed to
/// the token's allow-list. Wildcard patterns are listed as configured.
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedToken>,
) -> AppResult<(StatusCode, Json<ModelsResponse>)> {
    let names: BTreeSet<String> = auth
        .token
        .group_chain()
        .iter()
        .flat_map(|group| state.registry.group_models(group))
        .filter(|model| auth.token.allows_model(model))
        .collect();

    let data = names
        .into_iter()
        .map(|id| Model {
            id,
            object: "model".to_string(),
            created: 0,
            owned_by: "relaygate".to_string(),
        })
        .collect();

    Ok((
        StatusCode::OK,
        Json(ModelsResponse {
            object: "list".to_string(),
            data,
        }),
    ))
}

//! Authentication middleware
//!
//! Resolves relay API tokens against the control plane and caches the
//! result, and guards the admin routes with a static bearer key.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::{
    cache::redis::keys, control::TokenInfo, error::AppError,
    routes::metrics::record_cache_operation, AppState,
};

/// Token attached to the request by `auth_middleware`
#[derive(Debug, Clone)]
pub struct AuthenticatedToken {
    pub token: TokenInfo,
    /// Raw bearer key, used by session fingerprints
    pub api_key: String,
}

/// Extract the bearer token from an Authorization header value
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Hash an API key for cache and control plane lookups
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn bearer(request: &Request) -> Result<String, AppError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    extract_bearer_token(auth_header)
        .map(str::to_string)
        .ok_or(AppError::InvalidToken)
}

/// Cached token, else resolved from the control plane
///
/// Cache failures are logged and fall through to the control plane.
async fn resolve(state: &AppState, token_hash: &str) -> Result<TokenInfo, AppError> {
    let key = keys::token(token_hash);

    match state.cache.get::<TokenInfo>(&key).await {
        Ok(Some(token)) => {
            record_cache_operation("token_get", "hit");
            return Ok(token);
        }
        Ok(None) => record_cache_operation("token_get", "miss"),
        Err(e) => {
            record_cache_operation("token_get", "error");
            warn!(error = %e, "Token cache read failed");
        }
    }

    let token = state.control.resolve_token(token_hash).await?;

    if let Err(e) = state
        .cache
        .set_with_ttl(&key, &token, state.config.token_cache_ttl_seconds)
        .await
    {
        warn!(error = %e, "Token cache write failed");
    }
    Ok(token)
}

/// Authentication middleware for the relay routes
///
/// Hashes the bearer key, resolves it (cache first), rejects disabled
/// tokens and stores an `AuthenticatedToken` in the request extensions.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let api_key = bearer(&request)?;
    let token_hash = hash_token(&api_key);

    let token = match resolve(&state, &token_hash).await {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "Token resolution failed");
            return Err(e);
        }
    };

    if !token.enabled {
        return Err(AppError::Forbidden("token is disabled".to_string()));
    }

    debug!(token_id = token.id, user_id = token.user_id, "Token authenticated");
    request
        .extensions_mut()
        .insert(AuthenticatedToken { token, api_key });

    Ok(next.run(request).await)
}

/// Guard for the admin routes
///
/// The routes do not exist when no admin key is configured.
pub async fn admin_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.admin_api_key.as_deref() else {
        return Err(AppError::NotFound(request.uri().path().to_string()));
    };

    let provided = bearer(&request)?;
    if hash_token(&provided) != hash_token(expected) {
        warn!("Rejected admin request with wrong key");
        return Err(AppError::InvalidToken);
    }

    Ok(next.run(request).await)
}

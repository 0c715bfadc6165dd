//! Caller-facing error shaping
//!
//! The terminal relay error is rewritten before it leaves the gateway:
//! request ids are normalized, rate-limit and quota flavoured messages are
//! replaced with a generic one, and auth failures on session-affine channels
//! do not mask a more meaningful earlier error.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::AppError;

use super::provider::UpstreamError;

/// Generic message for saturated upstreams
pub const SATURATED_MESSAGE: &str = "upstream load is saturated, please retry later";

/// Message of the synthetic error returned when retrying ran out of time
pub const RETRY_TIMEOUT_MESSAGE: &str = "retry timed out, upstream load is saturated, please retry later";

const GROUP_SATURATED_MESSAGE: &str = "upstream load for this group is saturated, please retry later";

static REQUEST_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(request id: [^\)]+\)").expect("valid request id regex"));

const QUOTA_KEYWORDS: &[&str] = &["quota", "balance", "credit", "no available channel"];

/// What the sanitizer needs to know beyond the error
#[derive(Debug, Clone, Copy)]
pub struct SanitizeContext<'a> {
    pub request_id: &'a str,
    /// First failure of the request that was not a 401/403
    pub first_non_auth_error: Option<&'a UpstreamError>,
    /// The failing channel type keeps sessions pinned to one credential
    pub session_affine: bool,
}

fn with_request_id(message: &str, request_id: &str) -> String {
    let stripped = REQUEST_ID.replace_all(message, "");
    if request_id.is_empty() {
        stripped.into_owned()
    } else {
        format!("{} (request id: {})", stripped, request_id)
    }
}

fn mentions_quota(message: &str) -> bool {
    let lower = message.to_lowercase();
    QUOTA_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn is_provider_typed(error_type: &str) -> bool {
    error_type == "relaygate_error" || error_type.ends_with("_api_error")
}

fn upstream(status: u16, error_type: impl Into<String>, message: String) -> AppError {
    AppError::Upstream {
        status,
        error_type: error_type.into(),
        message,
    }
}

/// Turn the terminal relay error into what the caller sees
pub fn sanitize(err: &UpstreamError, ctx: &SanitizeContext<'_>) -> AppError {
    if ctx.session_affine && !err.is_local && err.is_auth_failure() {
        if let Some(first) = ctx.first_non_auth_error {
            let nested = SanitizeContext {
                first_non_auth_error: None,
                session_affine: false,
                ..*ctx
            };
            return sanitize(first, &nested);
        }
        let error_type = if err.status == 401 {
            "authentication_error"
        } else {
            "access_denied"
        };
        return upstream(
            429,
            error_type,
            with_request_id(SATURATED_MESSAGE, ctx.request_id),
        );
    }

    let mut status = err.status;
    let mut error_type = err.error_type.clone();
    let mut message = if status == 429 && !err.is_local {
        GROUP_SATURATED_MESSAGE.to_string()
    } else {
        err.message.clone()
    };

    if err.code.as_deref() == Some("bad_response_status_code")
        && !message.contains("bad response status code")
    {
        message = format!(
            "Provider API error: bad response status code {}",
            err.param.as_deref().unwrap_or_default()
        );
    }

    if !err.is_local && is_provider_typed(&error_type) {
        error_type = "system_error".to_string();
        if mentions_quota(&message) {
            message = SATURATED_MESSAGE.to_string();
            status = 429;
        }
    }

    upstream(status, error_type, with_request_id(&message, ctx.request_id))
}

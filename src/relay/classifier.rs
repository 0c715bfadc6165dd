//! Failure classification
//!
//! Decides, once per failed attempt and from the raw status and flags only,
//! whether the request may move on to another channel and whether the
//! failed channel should cool down for the model.

use crate::channel::ChannelType;

use super::provider::UpstreamError;

/// Why a failure ends the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// Client or configuration fault
    Local,
    /// Caller pinned a channel, there is nowhere else to go
    Pinned,
    /// Bytes already reached the caller
    Delivered,
    /// 408/504/524; not retried to bound tail latency
    UpstreamTimeout,
    /// 400 outside the retryable allow-list
    BadRequest,
    /// Success status on the error path
    SuccessStatus,
}

impl FatalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FatalKind::Local => "local_error",
            FatalKind::Pinned => "pinned_channel",
            FatalKind::Delivered => "output_delivered",
            FatalKind::UpstreamTimeout => "upstream_timeout",
            FatalKind::BadRequest => "bad_request",
            FatalKind::SuccessStatus => "success_status",
        }
    }
}

/// Classifier outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Try another channel; cool the failed one down for this long first
    Retry { cooldown_seconds: Option<i64> },
    Fatal(FatalKind),
}

impl Verdict {
    pub fn is_retry(&self) -> bool {
        matches!(self, Verdict::Retry { .. })
    }
}

/// Inputs beyond the error itself
#[derive(Debug, Clone, Copy)]
pub struct ClassifyContext {
    /// Caller pinned a channel and did not ask to ignore the pin
    pub pinned: bool,
    /// Cooldown applied when the provider gave no usable reset time
    pub default_cooldown_seconds: i64,
    /// Current unix time
    pub now: i64,
}

/// Classify one failed attempt
pub fn classify(err: &UpstreamError, ctx: &ClassifyContext) -> Verdict {
    if err.is_local {
        return Verdict::Fatal(FatalKind::Local);
    }
    if ctx.pinned {
        return Verdict::Fatal(FatalKind::Pinned);
    }
    if err.delivered {
        return Verdict::Fatal(FatalKind::Delivered);
    }

    match err.status {
        429 => Verdict::Retry {
            cooldown_seconds: Some(rate_limit_cooldown(err, ctx)),
        },
        307 => Verdict::Retry {
            cooldown_seconds: None,
        },
        408 | 504 | 524 => Verdict::Fatal(FatalKind::UpstreamTimeout),
        400 => {
            if retryable_bad_request(err) {
                Verdict::Retry {
                    cooldown_seconds: None,
                }
            } else {
                Verdict::Fatal(FatalKind::BadRequest)
            }
        }
        500..=599 => Verdict::Retry {
            cooldown_seconds: None,
        },
        200..=299 => Verdict::Fatal(FatalKind::SuccessStatus),
        _ => Verdict::Retry {
            cooldown_seconds: None,
        },
    }
}

/// Seconds until the announced reset, or the default when absent or past
fn rate_limit_cooldown(err: &UpstreamError, ctx: &ClassifyContext) -> i64 {
    err.rate_limit_reset_at
        .map(|reset_at| reset_at.saturating_sub(ctx.now))
        .filter(|seconds| *seconds > 0)
        .unwrap_or(ctx.default_cooldown_seconds)
}

/// 400s that mean "this credential is unusable" rather than "bad request"
fn retryable_bad_request(err: &UpstreamError) -> bool {
    match err.channel_type {
        ChannelType::Anthropic => err.message.contains("Your credit balance is too low"),
        ChannelType::Bedrock => err.message.contains("Operation not allowed"),
        _ => {
            err.param.as_deref() == Some("INVALID_ARGUMENT")
                && err.message.contains("API key not valid")
        }
    }
}

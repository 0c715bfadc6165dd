//! Retry lifecycle logging
//!
//! One `RetryTrace` follows a request through its retry sequence. Every
//! lifecycle point is logged once with the same correlation fields, counted
//! in `relaygate_retry_events_total{event}`, and kept in order so the final
//! outcome can report what happened.

use std::time::Instant;

use tracing::{error, info, warn};

use crate::channel::{ChannelId, ChannelType};

/// Longest error message written to the log
const MAX_LOGGED_MESSAGE: usize = 512;

/// One lifecycle point of a retry sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    Start {
        channel_id: ChannelId,
        status: u16,
        total_channels: usize,
        budget: u32,
    },
    Skip {
        channel_id: ChannelId,
        status: u16,
        reason: &'static str,
    },
    Attempt {
        channel_id: ChannelId,
        attempt: u32,
        remaining_channels: usize,
        cooldown_applied: bool,
    },
    Success {
        channel_id: ChannelId,
        attempt: u32,
    },
    Failed {
        channel_id: ChannelId,
        attempt: u32,
        status: u16,
    },
    StopCondition {
        channel_id: ChannelId,
        attempt: u32,
        reason: &'static str,
    },
    Timeout {
        channel_id: ChannelId,
    },
    Exhausted {
        channel_id: ChannelId,
        attempts: u32,
        status: u16,
    },
    Cooldown {
        channel_id: ChannelId,
        seconds: i64,
    },
}

impl RetryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RetryEvent::Start { .. } => "retry_start",
            RetryEvent::Skip { .. } => "retry_skip",
            RetryEvent::Attempt { .. } => "retry_attempt",
            RetryEvent::Success { .. } => "retry_success",
            RetryEvent::Failed { .. } => "retry_failed",
            RetryEvent::StopCondition { .. } => "retry_stop_condition",
            RetryEvent::Timeout { .. } => "retry_timeout",
            RetryEvent::Exhausted { .. } => "retry_exhausted",
            RetryEvent::Cooldown { .. } => "channel_cooldown",
        }
    }
}

fn truncated(message: &str) -> &str {
    match message.char_indices().nth(MAX_LOGGED_MESSAGE) {
        Some((index, _)) => &message[..index],
        None => message,
    }
}

/// Per-request lifecycle recorder
#[derive(Debug)]
pub struct RetryTrace {
    pub request_id: String,
    pub model: String,
    pub group: String,
    start_time: Instant,
    budget: u32,
    total_channels: usize,
    events: Vec<RetryEvent>,
}

impl RetryTrace {
    pub fn new(request_id: impl Into<String>, model: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            model: model.into(),
            group: group.into(),
            start_time: Instant::now(),
            budget: 0,
            total_channels: 0,
            events: Vec::new(),
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }

    pub fn events(&self) -> &[RetryEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<RetryEvent> {
        self.events
    }

    /// Update the counters carried on later events
    pub fn set_budget(&mut self, budget: u32, total_channels: usize) {
        self.budget = budget;
        self.total_channels = total_channels;
    }

    fn record(&mut self, event: RetryEvent) {
        metrics::counter!("relaygate_retry_events_total", "event" => event.name()).increment(1);
        self.events.push(event);
    }

    /// First attempt failed; the retry sequence begins
    pub fn retry_start(&mut self, channel_id: ChannelId, status: u16, message: &str) {
        error!(
            event = "retry_start",
            request_id = %self.request_id,
            model = %self.model,
            group = %self.group,
            channel_id,
            status,
            total_channels = self.total_channels,
            budget = self.budget,
            error = %truncated(message),
            "Attempt failed, starting retry sequence"
        );
        self.record(RetryEvent::Start {
            channel_id,
            status,
            total_channels: self.total_channels,
            budget: self.budget,
        });
    }

    /// First failure is not retried
    pub fn retry_skip(&mut self, channel_id: ChannelId, status: u16, reason: &'static str) {
        error!(
            event = "retry_skip",
            request_id = %self.request_id,
            model = %self.model,
            channel_id,
            status,
            reason,
            total_channels = self.total_channels,
            "Failure is not retryable"
        );
        self.record(RetryEvent::Skip {
            channel_id,
            status,
            reason,
        });
    }

    pub fn retry_attempt(
        &mut self,
        channel_id: ChannelId,
        attempt: u32,
        remaining_channels: usize,
        cooldown_applied: bool,
    ) {
        warn!(
            event = "retry_attempt",
            request_id = %self.request_id,
            model = %self.model,
            channel_id,
            attempt,
            budget = self.budget,
            remaining_channels,
            total_channels = self.total_channels,
            cooldown_applied,
            "Retrying on another channel"
        );
        self.record(RetryEvent::Attempt {
            channel_id,
            attempt,
            remaining_channels,
            cooldown_applied,
        });
    }

    pub fn retry_success(&mut self, channel_id: ChannelId, attempt: u32) {
        info!(
            event = "retry_success",
            request_id = %self.request_id,
            model = %self.model,
            channel_id,
            attempt,
            budget = self.budget,
            total_channels = self.total_channels,
            elapsed_ms = %self.elapsed_ms(),
            "Retry succeeded"
        );
        self.record(RetryEvent::Success {
            channel_id,
            attempt,
        });
    }

    pub fn retry_failed(
        &mut self,
        channel_id: ChannelId,
        attempt: u32,
        status: u16,
        error_type: &str,
        message: &str,
    ) {
        error!(
            event = "retry_failed",
            request_id = %self.request_id,
            model = %self.model,
            channel_id,
            attempt,
            budget = self.budget,
            status,
            error_type,
            error = %truncated(message),
            "Retry attempt failed"
        );
        self.record(RetryEvent::Failed {
            channel_id,
            attempt,
            status,
        });
    }

    /// Loop ends early on a fatal verdict
    pub fn retry_stop_condition(&mut self, channel_id: ChannelId, attempt: u32, reason: &'static str) {
        error!(
            event = "retry_stop_condition",
            request_id = %self.request_id,
            model = %self.model,
            channel_id,
            attempt,
            budget = self.budget,
            reason,
            "Stopping retries"
        );
        self.record(RetryEvent::StopCondition {
            channel_id,
            attempt,
            reason,
        });
    }

    pub fn retry_timeout(&mut self, channel_id: ChannelId, timeout_ms: u128) {
        error!(
            event = "retry_timeout",
            request_id = %self.request_id,
            model = %self.model,
            channel_id,
            elapsed_ms = %self.elapsed_ms(),
            timeout_ms = %timeout_ms,
            "Retry sequence timed out"
        );
        self.record(RetryEvent::Timeout { channel_id });
    }

    /// Retry sequence ended without success
    pub fn retry_exhausted(&mut self, channel_id: ChannelId, attempts: u32, status: u16, message: &str) {
        error!(
            event = "retry_exhausted",
            request_id = %self.request_id,
            model = %self.model,
            channel_id,
            attempts,
            budget = self.budget,
            total_channels = self.total_channels,
            status,
            error = %truncated(message),
            "Retries exhausted"
        );
        self.record(RetryEvent::Exhausted {
            channel_id,
            attempts,
            status,
        });
    }

    pub fn channel_cooldown(&mut self, channel_id: ChannelId, seconds: i64, reset_at: Option<i64>) {
        warn!(
            event = "channel_cooldown",
            request_id = %self.request_id,
            model = %self.model,
            channel_id,
            duration_seconds = seconds,
            reset_at = ?reset_at,
            reason = "rate_limit",
            "Channel cooling down for model"
        );
        metrics::counter!("relaygate_channel_cooldowns_total").increment(1);
        self.record(RetryEvent::Cooldown {
            channel_id,
            seconds,
        });
    }
}

/// Log and count an automatic or manual channel disable
pub fn channel_disabled(
    channel_id: ChannelId,
    channel_name: &str,
    channel_type: ChannelType,
    status: u16,
    reason: &str,
    automatic: bool,
) {
    error!(
        event = "channel_disabled",
        channel_id,
        channel_name,
        channel_type = %channel_type,
        status,
        reason = %truncated(reason),
        auto_disabled = automatic,
        "Channel disabled"
    );
    metrics::counter!(
        "relaygate_channels_disabled_total",
        "automatic" => automatic.to_string()
    )
    .increment(1);
}

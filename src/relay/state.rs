//! Per-request retry state
//!
//! Passed explicitly through the orchestrator; nothing here outlives the
//! request.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::channel::{ChannelFilter, ChannelId};

use super::provider::UpstreamError;

#[derive(Debug)]
pub struct RetryState {
    started_at: Instant,
    timeout: Duration,
    /// Available channels counted once, when the first attempt failed
    pub total_at_start: usize,
    /// `min(configured retries, total_at_start)`, or 0 when not retrying
    pub budget: u32,
    /// 1-based number of the current attempt
    pub attempt: u32,
    tried: Vec<ChannelId>,
    first_non_auth_error: Option<UpstreamError>,
}

impl RetryState {
    pub fn new(timeout: Duration) -> Self {
        Self::started_at(Instant::now(), timeout)
    }

    pub fn started_at(started_at: Instant, timeout: Duration) -> Self {
        Self {
            started_at,
            timeout,
            total_at_start: 0,
            budget: 0,
            attempt: 1,
            tried: Vec::new(),
            first_non_auth_error: None,
        }
    }

    /// Freeze the channel count and derive the budget from it
    pub fn freeze_budget(&mut self, max_retries: u32, total_at_start: usize) {
        self.total_at_start = total_at_start;
        let available = u32::try_from(total_at_start).unwrap_or(u32::MAX);
        self.budget = max_retries.min(available);
    }

    pub fn cancel_retries(&mut self) {
        self.budget = 0;
    }

    /// Record a tried channel; later selections exclude it
    pub fn mark_tried(&mut self, channel_id: ChannelId) {
        if !self.tried.contains(&channel_id) {
            self.tried.push(channel_id);
        }
    }

    pub fn tried(&self) -> &[ChannelId] {
        &self.tried
    }

    pub fn skip_filter(&self) -> ChannelFilter {
        ChannelFilter::ExcludeIds(self.tried.iter().copied().collect::<HashSet<_>>())
    }

    /// Keep the first failure that is not a 401/403
    pub fn remember_failure(&mut self, err: &UpstreamError) {
        if self.first_non_auth_error.is_none() && !err.is_auth_failure() {
            self.first_non_auth_error = Some(err.clone());
        }
    }

    pub fn first_non_auth_error(&self) -> Option<&UpstreamError> {
        self.first_non_auth_error.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn timed_out(&self) -> bool {
        self.elapsed() > self.timeout
    }

    /// Retries left in the budget
    pub fn retries_left(&self) -> u32 {
        (self.budget + 1).saturating_sub(self.attempt)
    }
}

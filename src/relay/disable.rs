//! Automatic channel disabling
//!
//! Every failed attempt is evaluated off the request path. A run of
//! consecutive auth failures, or a single hard account failure, takes the
//! channel out of the routing table for all models and tells the control
//! plane. This is independent of the per-model cooldown.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::{
    channel::{Channel, ChannelId, ChannelRegistry, ChannelType},
    config::DisablePolicyOptions,
    error::AppResult,
    session::SessionKeyRegistry,
};

use super::{events, provider::UpstreamError};

/// Upstream messages that mean the credential is gone for good
const HARD_ACCOUNT_FAILURES: &[&str] = &[
    "account_deactivated",
    "account has been deactivated",
    "incorrect api key",
    "invalid x-api-key",
    "api key not valid",
    "organization has been disabled",
    "credit balance is too low",
];

/// Persists a disable decision outside this process
#[async_trait]
pub trait ChannelDisabler: Send + Sync {
    async fn disable_channel(
        &self,
        channel_id: ChannelId,
        channel_name: &str,
        reason: &str,
        automatic: bool,
    ) -> AppResult<()>;
}

/// Disabler that only affects the local routing table
pub struct LocalOnlyDisabler;

#[async_trait]
impl ChannelDisabler for LocalOnlyDisabler {
    async fn disable_channel(&self, channel_id: ChannelId, _: &str, _: &str, _: bool) -> AppResult<()> {
        debug!(channel_id, "No control plane configured, channel disabled locally only");
        Ok(())
    }
}

/// Why a channel is being disabled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisableReason {
    AuthFailures { consecutive: u32 },
    HardAccountFailure(String),
}

impl DisableReason {
    fn describe(&self, err: &UpstreamError) -> String {
        match self {
            DisableReason::AuthFailures { consecutive } => format!(
                "{} consecutive auth failures, last status {}: {}",
                consecutive, err.status, err.message
            ),
            DisableReason::HardAccountFailure(pattern) => {
                format!("account failure ({}): {}", pattern, err.message)
            }
        }
    }
}

pub struct AutoDisabler {
    registry: Arc<ChannelRegistry>,
    disabler: Arc<dyn ChannelDisabler>,
    sessions: SessionKeyRegistry,
    options: DisablePolicyOptions,
    auth_runs: DashMap<ChannelId, u32>,
}

impl AutoDisabler {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        disabler: Arc<dyn ChannelDisabler>,
        sessions: SessionKeyRegistry,
        options: DisablePolicyOptions,
    ) -> Self {
        Self {
            registry,
            disabler,
            sessions,
            options,
            auth_runs: DashMap::new(),
        }
    }

    fn counts_as_auth_failure(&self, channel_type: ChannelType, err: &UpstreamError) -> bool {
        match err.status {
            401 => true,
            403 => self.sessions.is_affine(channel_type),
            _ => false,
        }
    }

    /// Apply one failure to the channel's history and decide
    pub fn should_disable(&self, channel_id: ChannelId, channel_type: ChannelType, err: &UpstreamError) -> Option<DisableReason> {
        if !self.options.enabled || err.is_local {
            return None;
        }

        let message = err.message.to_lowercase();
        if let Some(pattern) = HARD_ACCOUNT_FAILURES.iter().find(|p| message.contains(*p)) {
            self.auth_runs.remove(&channel_id);
            return Some(DisableReason::HardAccountFailure((*pattern).to_string()));
        }

        if !self.counts_as_auth_failure(channel_type, err) {
            self.auth_runs.remove(&channel_id);
            return None;
        }

        let consecutive = {
            let mut run = self.auth_runs.entry(channel_id).or_insert(0);
            *run += 1;
            *run
        };
        if consecutive >= self.options.auth_failure_threshold {
            self.auth_runs.remove(&channel_id);
            Some(DisableReason::AuthFailures { consecutive })
        } else {
            None
        }
    }

    /// A success breaks the failure run
    pub fn record_success(&self, channel_id: ChannelId) {
        self.auth_runs.remove(&channel_id);
    }

    /// Evaluate a failure and disable the channel if the policy says so
    pub async fn evaluate(&self, channel: &Channel, err: &UpstreamError) -> bool {
        let Some(reason) = self.should_disable(channel.id, channel.channel_type, err) else {
            return false;
        };

        let reason = reason.describe(err);
        if !self.registry.disable(channel.id) {
            debug!(channel_id = channel.id, "Channel no longer in routing table");
        }
        events::channel_disabled(
            channel.id,
            &channel.name,
            channel.channel_type,
            err.status,
            &reason,
            true,
        );

        if let Err(e) = self
            .disabler
            .disable_channel(channel.id, &channel.name, &reason, true)
            .await
        {
            error!(channel_id = channel.id, error = %e, "Failed to persist channel disable");
        }
        true
    }

    /// Run `evaluate` without blocking the request
    pub fn spawn_evaluation(self: &Arc<Self>, channel: Arc<Channel>, err: UpstreamError) -> JoinHandle<bool> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.evaluate(&channel, &err).await })
    }
}

//! Control plane data models
//!
//! Request and response bodies of the control plane API. Every response is
//! wrapped in a `{"success": bool, "data": ...}` envelope.

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelId, ChannelType};

/// Standard response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default = "default_true")]
    pub success: bool,
    pub data: T,
}

fn default_true() -> bool {
    true
}

/// API token as resolved by the control plane
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub name: String,
    /// Routing group set on the token (empty = not set)
    #[serde(default)]
    pub group: String,
    /// Fallback group tried after `group`
    #[serde(default)]
    pub backup_group: String,
    /// Owning user's group, used when the token sets none
    #[serde(default)]
    pub user_group: String,
    /// Channel the token is pinned to
    #[serde(default)]
    pub specific_channel_id: Option<ChannelId>,
    /// Route normally even though a channel is pinned
    #[serde(default)]
    pub ignore_specific_channel: bool,
    /// Allowed models (empty = all)
    #[serde(default)]
    pub allowed_models: Vec<String>,
    /// Allowed channel types (empty = all)
    #[serde(default)]
    pub allowed_channel_types: Vec<ChannelType>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl TokenInfo {
    /// Routing groups to try, in order
    ///
    /// Token group, then backup group (when different). Falls back to the
    /// user's group when the token sets neither.
    pub fn group_chain(&self) -> Vec<String> {
        let mut chain = Vec::new();
        if !self.group.is_empty() {
            chain.push(self.group.clone());
        }
        if !self.backup_group.is_empty() && self.backup_group != self.group {
            chain.push(self.backup_group.clone());
        }
        if chain.is_empty() {
            chain.push(self.user_group.clone());
        }
        chain
    }

    /// Pinned channel, unless the token asks to ignore the pin
    pub fn pinned_channel(&self) -> Option<ChannelId> {
        self.specific_channel_id
            .filter(|id| *id > 0 && !self.ignore_specific_channel)
    }

    pub fn allows_model(&self, model: &str) -> bool {
        self.allowed_models.is_empty() || self.allowed_models.iter().any(|m| m == model)
    }
}

/// Reservation created by a quota pre-consume
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationData {
    pub id: String,
}

/// Final usage reported when settling a reservation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub is_stream: bool,
}

/// Request to disable a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisableChannelRequest {
    pub name: String,
    pub reason: String,
    pub automatic: bool,
}

//! Channel data model
//!
//! Channels are owned by the control plane; the registry only keeps
//! read-only copies of the enabled ones.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Channel identifier as assigned by the control plane
pub type ChannelId = i64;

/// Channel status value for enabled channels
pub const STATUS_ENABLED: i32 = 1;

/// Upstream provider kind behind a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    #[default]
    Openai,
    Anthropic,
    Bedrock,
    Gemini,
    VertexAi,
    ClaudeCode,
    GeminiCli,
    Codex,
    #[serde(other)]
    Other,
}

impl ChannelType {
    /// Stable name used in log fields and store keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Openai => "openai",
            ChannelType::Anthropic => "anthropic",
            ChannelType::Bedrock => "bedrock",
            ChannelType::Gemini => "gemini",
            ChannelType::VertexAi => "vertex_ai",
            ChannelType::ClaudeCode => "claude_code",
            ChannelType::GeminiCli => "gemini_cli",
            ChannelType::Codex => "codex",
            ChannelType::Other => "other",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured backend credential/endpoint able to serve a set of models
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub id: ChannelId,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub channel_type: ChannelType,
    /// Comma-separated routing groups
    #[serde(default)]
    pub group: String,
    /// Comma-separated served models; a trailing `*` marks a wildcard
    #[serde(default)]
    pub models: String,
    /// Selection weight; 0 or absent means "use the configured default"
    #[serde(default)]
    pub weight: Option<u32>,
    /// Higher priority tiers are tried first
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_status")]
    pub status: i32,
    /// Upstream base URL (without the `/v1/...` endpoint path)
    #[serde(default)]
    pub base_url: Option<String>,
    /// Upstream credential
    #[serde(default)]
    pub key: String,
    /// Requested model -> upstream model rename
    #[serde(default)]
    pub model_mapping: HashMap<String, String>,
    /// Channel only serves chat endpoints
    #[serde(default)]
    pub only_chat: bool,
    /// Models for which streaming is not allowed on this channel
    #[serde(default)]
    pub stream_disabled_models: Vec<String>,
}

fn default_status() -> i32 {
    STATUS_ENABLED
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            channel_type: ChannelType::default(),
            group: String::new(),
            models: String::new(),
            weight: None,
            priority: 0,
            status: STATUS_ENABLED,
            base_url: None,
            key: String::new(),
            model_mapping: HashMap::new(),
            only_chat: false,
            stream_disabled_models: Vec::new(),
        }
    }
}

impl Channel {
    /// Whether the control plane marks this channel enabled
    pub fn is_enabled(&self) -> bool {
        self.status == STATUS_ENABLED
    }

    /// Configured weight, with 0 treated as unset
    pub fn configured_weight(&self) -> u32 {
        self.weight.unwrap_or(0)
    }

    /// Trimmed, non-empty routing groups
    pub fn group_list(&self) -> Vec<String> {
        split_list(&self.group)
    }

    /// Trimmed, non-empty model names
    pub fn model_list(&self) -> Vec<String> {
        split_list(&self.models)
    }

    /// Whether streaming is allowed for the given model
    pub fn allows_stream(&self, model: &str) -> bool {
        !self.stream_disabled_models.iter().any(|m| m == model)
    }

    /// Upstream model name for a requested model
    pub fn mapped_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.model_mapping
            .get(model)
            .map(String::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(model)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

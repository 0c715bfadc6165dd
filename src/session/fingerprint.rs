//! Per-type session fingerprint strategies
//!
//! Each session-affine channel type recognises "the same conversation" in
//! its own way. All derivers return `None` when the request carries nothing
//! usable, which simply disables affinity for that request.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{SessionContext, SessionKeyDeriver};

static METADATA_SESSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"session_([a-f0-9-]{36})").expect("valid session regex"));

/// Characters of the caller's key mixed into the client fingerprint
const API_KEY_PREFIX_LEN: usize = 20;

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Truncated content hash (32 hex chars)
fn content_hash(content: &str) -> Option<String> {
    if content.is_empty() {
        return None;
    }
    let mut hash = sha256_hex(content);
    hash.truncate(32);
    Some(hash)
}

fn is_ephemeral(item: &Value) -> bool {
    item.pointer("/cache_control/type").and_then(Value::as_str) == Some("ephemeral")
}

/// Text of a message's `content`, string or array-of-text-blocks
fn message_text(message: &Value) -> String {
    match message.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect(),
        _ => String::new(),
    }
}

fn system_text(system: &Value) -> String {
    match system {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|i| i.get("text").and_then(Value::as_str))
            .collect(),
        _ => String::new(),
    }
}

/// Concatenated cache-marked content: ephemeral system blocks, then the
/// first non-empty message text if any message is cache-marked
fn cacheable_content(body: &Value) -> String {
    let mut content = String::new();

    if let Some(Value::Array(items)) = body.get("system") {
        for item in items.iter().filter(|i| is_ephemeral(i)) {
            if let Some(text) = item.get("text").and_then(Value::as_str) {
                content.push_str(text);
            }
        }
    }

    if let Some(Value::Array(messages)) = body.get("messages") {
        let marked = messages.iter().any(|m| match m.get("content") {
            Some(Value::Array(blocks)) => blocks.iter().any(is_ephemeral),
            Some(Value::String(_)) => is_ephemeral(m),
            _ => false,
        });
        if marked {
            if let Some(text) = messages.iter().map(message_text).find(|t| !t.is_empty()) {
                content.push_str(&text);
            }
        }
    }

    content
}

/// Messages-API clients that embed a session id in `metadata.user_id` or
/// mark a stable prompt prefix with `cache_control`
pub struct ClaudeCodeSession;

impl SessionKeyDeriver for ClaudeCodeSession {
    fn derive_session_key(&self, ctx: &SessionContext) -> Option<String> {
        let body = ctx.body.as_deref()?;

        if let Some(user_id) = body.pointer("/metadata/user_id").and_then(Value::as_str) {
            if let Some(caps) = METADATA_SESSION.captures(user_id) {
                return Some(caps[1].to_string());
            }
        }

        if let Some(hash) = content_hash(&cacheable_content(body)) {
            return Some(hash);
        }

        if let Some(hash) = body.get("system").and_then(|s| content_hash(&system_text(s))) {
            return Some(hash);
        }

        body.get("messages")
            .and_then(Value::as_array)
            .and_then(|m| m.first())
            .and_then(|first| content_hash(&message_text(first)))
    }
}

/// CLI clients recognised by user agent, address and key prefix
pub struct GeminiCliSession;

impl SessionKeyDeriver for GeminiCliSession {
    fn derive_session_key(&self, ctx: &SessionContext) -> Option<String> {
        let key_prefix: String = ctx.api_key.chars().take(API_KEY_PREFIX_LEN).collect();

        let parts: Vec<&str> = [
            ctx.user_agent.as_deref().unwrap_or_default(),
            ctx.client_ip.as_deref().unwrap_or_default(),
            key_prefix.as_str(),
        ]
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();

        if parts.is_empty() {
            return None;
        }
        Some(sha256_hex(&parts.join(":")))
    }
}

/// Clients sending an explicit `session_id` / `x-session-id` header
pub struct CodexSession;

impl SessionKeyDeriver for CodexSession {
    fn derive_session_key(&self, ctx: &SessionContext) -> Option<String> {
        ctx.session_header
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(sha256_hex)
    }
}

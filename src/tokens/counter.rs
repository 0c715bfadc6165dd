//! Token counter implementation
//!
//! Uses tiktoken-rs to estimate prompt tokens before an attempt is billed and
//! completion tokens when the upstream did not report usage.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tiktoken_rs::{cl100k_base, get_bpe_from_model, CoreBPE};

use crate::error::{AppError, AppResult};

/// Per-message overhead for chat formats (`<|start|>{role}\n{content}<|end|>\n`)
const TOKENS_PER_MESSAGE: usize = 3;
const TOKENS_PER_NAME: usize = 1;
/// Every reply is primed with `<|start|>assistant<|message|>`
const REPLY_PRIMING_TOKENS: usize = 3;

/// Thread-safe token counter with a per-model encoder cache
#[derive(Clone, Default)]
pub struct SharedTokenCounter {
    encoders: Arc<Mutex<HashMap<String, Arc<CoreBPE>>>>,
}

impl SharedTokenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn encoder(&self, model: &str) -> AppResult<Arc<CoreBPE>> {
        if let Some(encoder) = self.encoders.lock().get(model) {
            return Ok(encoder.clone());
        }

        let bpe = match get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(e) => {
                tracing::debug!(model, error = %e, "Unknown model, using cl100k_base encoder");
                cl100k_base().map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to load encoder: {}", e)))?
            }
        };

        let encoder = Arc::new(bpe);
        self.encoders
            .lock()
            .insert(model.to_string(), encoder.clone());
        Ok(encoder)
    }

    /// Count tokens in a text string
    pub fn count_tokens(&self, model: &str, text: &str) -> AppResult<usize> {
        if text.is_empty() {
            return Ok(0);
        }
        Ok(self.encoder(model)?.encode_with_special_tokens(text).len())
    }

    /// Count tokens for a list of chat messages, including format overhead
    pub fn count_chat_messages(&self, model: &str, messages: &[Value]) -> AppResult<usize> {
        let encoder = self.encoder(model)?;
        let count = |text: &str| encoder.encode_with_special_tokens(text).len();

        let mut total = REPLY_PRIMING_TOKENS;
        for message in messages {
            total += TOKENS_PER_MESSAGE;
            if let Some(role) = message.get("role").and_then(Value::as_str) {
                total += count(role);
            }
            if let Some(name) = message.get("name").and_then(Value::as_str) {
                total += count(name) + TOKENS_PER_NAME;
            }
            if let Some(content) = message.get("content") {
                total += count(&content_text(content));
            }
        }
        Ok(total)
    }

    /// Estimate prompt tokens of a relay request body
    ///
    /// Reads `messages` for chat, `prompt` for completions and `input` for
    /// embeddings; anything else counts as zero.
    pub fn estimate_prompt_tokens(&self, model: &str, body: &Value) -> AppResult<u32> {
        let tokens = if let Some(messages) = body.get("messages").and_then(Value::as_array) {
            self.count_chat_messages(model, messages)?
        } else if let Some(prompt) = body.get("prompt") {
            self.count_tokens(model, &content_text(prompt))?
        } else if let Some(input) = body.get("input") {
            self.count_tokens(model, &content_text(input))?
        } else {
            0
        };
        Ok(u32::try_from(tokens).unwrap_or(u32::MAX))
    }

    /// Estimate completion tokens from generated text
    pub fn estimate_completion_tokens(&self, model: &str, text: &str) -> AppResult<u32> {
        let tokens = self.count_tokens(model, text)?;
        Ok(u32::try_from(tokens).unwrap_or(u32::MAX))
    }
}

/// Flatten a string, string array or content-part array into plain text
fn content_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(_) => item.get("text").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

//! SSE streaming helpers
//!
//! Upstream SSE arrives in byte chunks that do not respect line or event
//! boundaries. `SseLineBuffer` re-assembles lines; `StreamAccumulator` reads
//! the `data:` payloads of an OpenAI-style stream to recover the generated
//! text, the reported usage and any in-band error.

use serde_json::Value;

use crate::billing::Usage;

/// Accumulates partial lines across chunk boundaries
///
/// ```
/// use relaygate::streaming::SseLineBuffer;
///
/// let mut buffer = SseLineBuffer::new();
/// assert!(buffer.feed(b"data: {\"a\":").is_empty());
/// assert_eq!(buffer.feed(b"1}\n\n"), vec!["data: {\"a\":1}"]);
/// ```
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    incomplete: String,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the complete, non-empty lines it finished
    ///
    /// Line endings (`\n` or `\r\n`) are stripped.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.incomplete.push_str(&String::from_utf8_lossy(bytes));

        let mut lines = Vec::new();
        while let Some(pos) = self.incomplete.find('\n') {
            let rest = self.incomplete.split_off(pos + 1);
            let line = std::mem::replace(&mut self.incomplete, rest);
            let line = line.trim_end_matches(['\n', '\r']);
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Whether a truncated line is pending
    pub fn has_incomplete(&self) -> bool {
        !self.incomplete.is_empty()
    }

    pub fn remaining(&self) -> &str {
        &self.incomplete
    }
}

/// Error reported inside a stream (`data: {"error": {...}}`)
#[derive(Debug, Clone, PartialEq)]
pub struct StreamError {
    pub message: String,
    pub error_type: Option<String>,
    pub code: Option<String>,
}

/// Collects what a streamed completion produced
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    lines: SseLineBuffer,
    text: String,
    usage: Option<Usage>,
    error: Option<StreamError>,
    done: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one raw chunk
    pub fn feed(&mut self, chunk: &[u8]) {
        for line in self.lines.feed(chunk) {
            self.process_line(&line);
        }
    }

    fn process_line(&mut self, line: &str) {
        let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
            return;
        };
        if data == "[DONE]" {
            self.done = true;
            return;
        }
        let Ok(payload) = serde_json::from_str::<Value>(data) else {
            return;
        };

        if let Some(err) = payload.get("error") {
            self.error = Some(StreamError {
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream error")
                    .to_string(),
                error_type: err.get("type").and_then(Value::as_str).map(str::to_string),
                code: err.get("code").and_then(value_as_string),
            });
            return;
        }

        if let Some(usage) = payload
            .get("usage")
            .filter(|u| !u.is_null())
            .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok())
        {
            self.usage = Some(usage);
        }

        if let Some(choices) = payload.get("choices").and_then(Value::as_array) {
            for choice in choices {
                let piece = choice
                    .pointer("/delta/content")
                    .or_else(|| choice.get("text"))
                    .and_then(Value::as_str);
                if let Some(piece) = piece {
                    self.text.push_str(piece);
                }
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    pub fn error(&self) -> Option<&StreamError> {
        self.error.as_ref()
    }

    /// Whether the `[DONE]` marker was seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn into_parts(self) -> (String, Option<Usage>) {
        (self.text, self.usage)
    }
}

/// Read a JSON value that may be a string or a number as a string
pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Text of a non-streamed completion body
pub fn completion_text(body: &Value) -> String {
    body.get("choices")
        .and_then(Value::as_array)
        .map(|choices| {
            choices
                .iter()
                .filter_map(|c| {
                    c.pointer("/message/content")
                        .or_else(|| c.get("text"))
                        .and_then(Value::as_str)
                })
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// SSE frame carrying an error, sent when a stream fails after it started
pub fn error_frame(message: &str, error_type: &str, code: &str) -> String {
    let payload = serde_json::json!({
        "error": {
            "message": message,
            "type": error_type,
            "code": code,
        }
    });
    format!("data: {}\n\ndata: [DONE]\n\n", payload)
}

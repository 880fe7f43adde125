//! `data:` line framing for server-sent event streams.
//!
//! Network chunks do not respect line boundaries, so [`EventStreamDecoder`]
//! keeps the unterminated tail of every chunk and prepends it to the next
//! one. Bytes are buffered rather than text so a multi-byte character split
//! across two chunks is decoded intact.

use serde::{Deserialize, Serialize};
use tracing::warn;

const DATA_PREFIX: &str = "data:";

#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
}

impl EventStreamDecoder {
    pub fn new() -> Self { Self::default() }

    /// Feed one chunk, returning the payloads of every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = data_payload(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        data_payload(&rest)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches(['\n', '\r']);
    text.strip_prefix(DATA_PREFIX).map(|rest| rest.trim().to_string())
}

/// One record of the chat stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Content { text: String },
    Thinking { text: String },
    Error { message: String },
    Done,
}

impl StreamEvent {
    /// Parse a payload, skipping (and logging) anything unusable.
    pub fn parse(payload: &str) -> Option<Self> {
        let payload = payload.trim();
        if matches!(payload, "" | "[DONE]" | "{}" | "null" | "undefined") {
            return None;
        }
        match serde_json::from_str::<StreamEvent>(payload) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("⚠️ Skipping unusable stream payload ({}): {}", e, truncate(payload, 100));
                None
            }
        }
    }

    pub fn payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"done"}"#.to_string())
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

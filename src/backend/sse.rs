// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Upstream SSE decoding
//
// Splits an upstream byte stream into `data:` payloads and rebuilds tool
// calls that arrive as per-index argument deltas.

use serde_json::{Map, Value};

use super::BackendError;
use crate::toolcall;

/// Maximum size of a single tool call's accumulated arguments.
pub const MAX_TOOL_CALL_BUFFER_BYTES: usize = 1_048_576;

/// One payload from a `data:` line.
#[derive(Debug, Clone, PartialEq)]
pub enum SseData {
    Json(String),
    Done,
}

/// Parse a single SSE line. Blank lines, comments and non-data fields
/// yield `None`.
pub fn parse_sse_line(line: &str) -> Option<SseData> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    let data = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))?
        .trim();
    if data == "[DONE]" {
        Some(SseData::Done)
    } else {
        Some(SseData::Json(data.to_string()))
    }
}

/// Reassembles lines across network chunk boundaries.
///
/// Bytes are buffered raw so a UTF-8 sequence split between chunks is
/// decoded only once complete.
#[derive(Debug, Default)]
pub struct SseLines {
    pending: Vec<u8>,
}

impl SseLines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning the payloads of every completed line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseData> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if let Some(data) = parse_sse_line(&String::from_utf8_lossy(&line)) {
                out.push(data);
            }
        }
        out
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseData> {
        let rest = std::mem::take(&mut self.pending);
        parse_sse_line(&String::from_utf8_lossy(&rest))
    }
}

/// Accumulates one streamed tool call until the upstream finishes it.
#[derive(Debug, Clone, Default)]
pub struct ToolCallBuffer {
    pub name: String,
    pub arguments_json: String,
}

impl ToolCallBuffer {
    /// Append an arguments delta; errors if the buffer would exceed the limit.
    pub fn append_arguments(&mut self, delta: &str) -> Result<(), BackendError> {
        if self.arguments_json.len() + delta.len() > MAX_TOOL_CALL_BUFFER_BYTES {
            return Err(BackendError::Protocol(format!(
                "tool call '{}' exceeded {MAX_TOOL_CALL_BUFFER_BYTES} byte limit",
                self.name
            )));
        }
        self.arguments_json.push_str(delta);
        Ok(())
    }

    /// Decode the accumulated arguments. Empty means no arguments.
    pub fn parse_arguments(&self) -> Result<Map<String, Value>, BackendError> {
        if self.arguments_json.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&self.arguments_json) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(BackendError::Protocol(format!(
                "tool call '{}' arguments are not an object: {other}",
                self.name
            ))),
            Err(e) => Err(BackendError::Protocol(format!(
                "tool call '{}' has invalid JSON arguments: {e}",
                self.name
            ))),
        }
    }

    /// Salvage malformed arguments through the text tool-call parser.
    ///
    /// A result is kept only if it decodes to an object that appears
    /// verbatim in the buffer.
    pub fn recover_arguments(&self) -> Option<Map<String, Value>> {
        let name = Value::String(self.name.clone());
        let envelope = format!(
            "{{\"tool_calls\":[{{\"name\":{name},\"arguments\":{}}}]}}",
            self.arguments_json
        );
        let call = toolcall::parse(&envelope)?.into_iter().next()?;
        let recovered = call.function.arguments.trim();
        if recovered.is_empty() || !self.arguments_json.contains(recovered) {
            return None;
        }
        match serde_json::from_str::<Value>(recovered).ok()? {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }
}

// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Streaming response encoder
//
// Responsibilities:
// - Non-streaming: drain events into a single chat.completion body
// - Streaming: role chunk first, then batched content deltas
// - Trim output at the first stop sequence and cancel generation
// - Frame tool calls as id/type, name and bounded argument deltas
// - Buffer text for the tool-call parser when tools are not native
// - Estimate usage when the backend reports no token counts

mod collect;
mod encoder;
mod stop;
mod types;

pub use collect::collect_completion;
pub use encoder::{char_chunks, sse_frame, stream_completion, StreamOutcome, DONE_FRAME};
pub use stop::{Pushed, StopMatcher};
pub use types::{
    estimate_tokens, prompt_chars, ChatCompletion, ChatCompletionChunk, Choice, ChunkChoice, Delta,
    FinishReason, ResponseContext, Usage,
};

use serde_json::{Map, Value};

use crate::message::ToolCall;

/// Wire form of a natively emitted tool call.
fn native_call(name: String, arguments: Map<String, Value>) -> ToolCall {
    ToolCall::function(name, Value::Object(arguments).to_string())
}

// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Non-streaming responses: drain the generation into one `chat.completion`.

use super::native_call;
use super::stop::StopMatcher;
use super::types::{ChatCompletion, FinishReason, ResponseContext, Usage};
use crate::backend::{BackendError, GenerationEvent};
use crate::message::{Message, Role};
use crate::pipeline::GenerationStream;
use crate::toolcall;

/// Collect a full completion.
///
/// A backend error is returned as-is; nothing has been sent yet, so the
/// caller can still answer with a 500.
pub async fn collect_completion(
    mut events: GenerationStream,
    ctx: &ResponseContext,
) -> Result<ChatCompletion, BackendError> {
    let mut matcher = StopMatcher::new(&ctx.stop);
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    while let Some(event) = events.recv().await {
        match event? {
            GenerationEvent::TextFragment(fragment) => {
                let pushed = matcher.push(&fragment);
                content.push_str(&pushed.emit);
                if pushed.stopped {
                    events.cancel();
                    break;
                }
            }
            GenerationEvent::ToolCallEmitted { name, arguments } => {
                events.cancel();
                tool_calls.push(native_call(name, arguments));
                break;
            }
        }
    }
    content.push_str(&matcher.finish());

    if tool_calls.is_empty() && ctx.parse_tool_calls {
        if let Some(parsed) = toolcall::parse(&content) {
            tool_calls = parsed;
            content.clear();
        }
    }

    let completion_chars = content.chars().count()
        + tool_calls
            .iter()
            .map(|c| c.function.name.chars().count() + c.function.arguments.chars().count())
            .sum::<usize>();

    let finish_reason = if tool_calls.is_empty() {
        FinishReason::Stop
    } else {
        FinishReason::ToolCalls
    };
    let message = Message {
        role: Role::Assistant,
        content: (!content.is_empty() || tool_calls.is_empty()).then_some(content),
        tool_calls,
        tool_call_id: None,
        name: None,
    };

    Ok(ctx.completion(
        message,
        finish_reason,
        Usage::estimate(ctx.prompt_chars, completion_chars),
    ))
}

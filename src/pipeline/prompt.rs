// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Prompt construction
//
// Backends that accept role-tagged turns get the messages as-is (with
// tool instructions folded in when tools are parsed from text). Others
// get a flattened transcript with role labels and a trailing cue.

use crate::backend::Prompt;
use crate::message::{Message, Role, ToolChoice, ToolDefinition};
use crate::toolcall;

/// Cue that ends a flattened prompt.
pub const ASSISTANT_CUE: &str = "Assistant:";

/// Instructions telling a model without native tool calling how to call
/// the offered functions.
pub fn tool_instructions(tools: &[ToolDefinition], choice: Option<&ToolChoice>) -> String {
    let mut out = String::from("You can call the following functions:\n");
    for tool in tools {
        let function = &tool.function;
        out.push_str("- ");
        out.push_str(&function.name);
        if let Some(description) = function.description.as_deref().filter(|d| !d.is_empty()) {
            out.push_str(": ");
            out.push_str(description);
        }
        out.push('\n');
        if let Some(parameters) = &function.parameters {
            out.push_str("  parameters: ");
            out.push_str(&parameters.to_string());
            out.push('\n');
        }
    }
    out.push_str(
        "To call functions, reply with only a JSON object of the form:\n\
         {\"tool_calls\":[{\"name\":\"<function name>\",\"arguments\":{<arguments>}}]}\n",
    );
    match choice {
        Some(ToolChoice::Required) => out.push_str("You must call at least one function."),
        Some(ToolChoice::Function(name)) => {
            out.push_str(&format!("You must call the function `{name}`."))
        }
        _ => out.push_str("If no function is needed, reply normally."),
    }
    out
}

/// Build the prompt for a backend.
///
/// `instructions` is appended to the system block when tool calls will
/// be parsed from text.
pub fn build_prompt(messages: &[Message], structured_turns: bool, instructions: Option<&str>) -> Prompt {
    if structured_turns {
        Prompt::Turns(structured(messages, instructions))
    } else {
        Prompt::Text(flatten(messages, instructions))
    }
}

fn system_block(messages: &[Message], instructions: Option<&str>) -> String {
    let mut parts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(Message::text)
        .filter(|t| !t.is_empty())
        .collect();
    if let Some(instructions) = instructions {
        parts.push(instructions);
    }
    parts.join("\n\n")
}

fn structured(messages: &[Message], instructions: Option<&str>) -> Vec<Message> {
    let Some(instructions) = instructions else {
        return messages.to_vec();
    };

    // The backend does not understand tool calls, so assistant turns carry
    // them as the same JSON the model is asked to produce.
    let mut turns = Vec::with_capacity(messages.len() + 1);
    turns.push(Message::new(Role::System, system_block(messages, Some(instructions))));
    for message in messages.iter().filter(|m| m.role != Role::System) {
        let mut turn = message.clone();
        if !turn.tool_calls.is_empty() {
            turn.content = Some(assistant_text(message));
            turn.tool_calls.clear();
        }
        turns.push(turn);
    }
    turns
}

fn assistant_text(message: &Message) -> String {
    if message.tool_calls.is_empty() {
        return message.text().to_string();
    }
    let rendered = toolcall::render(&message.tool_calls);
    match message.text() {
        "" => rendered,
        text => format!("{text}\n{rendered}"),
    }
}

fn flatten(messages: &[Message], instructions: Option<&str>) -> String {
    let mut out = String::new();
    let system = system_block(messages, instructions);
    if !system.is_empty() {
        out.push_str(Role::System.label());
        out.push_str(": ");
        out.push_str(&system);
        out.push_str("\n\n");
    }

    for message in messages.iter().filter(|m| m.role != Role::System) {
        match message.role {
            Role::Assistant => {
                out.push_str(Role::Assistant.label());
                out.push_str(": ");
                out.push_str(&assistant_text(message));
            }
            Role::Tool => {
                out.push_str(Role::Tool.label());
                if let Some(id) = &message.tool_call_id {
                    out.push_str(&format!(" ({id})"));
                }
                out.push_str(": ");
                out.push_str(message.text());
            }
            role => {
                out.push_str(role.label());
                out.push_str(": ");
                out.push_str(message.text());
            }
        }
        out.push_str("\n\n");
    }

    out.push_str(ASSISTANT_CUE);
    out
}

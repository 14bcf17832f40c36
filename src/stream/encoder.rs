// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// SSE encoder
//
// Drains a generation and writes `chat.completion.chunk` frames into the
// connection's channel. The channel is the connection's only writer, so
// frames are never interleaved.

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::stop::StopMatcher;
use super::types::{Delta, FinishReason, ResponseContext, Usage};
use super::native_call;
use crate::backend::GenerationEvent;
use crate::config::StreamingConfig;
use crate::message::{DeltaFunction, DeltaToolCall, Role, ToolCall};
use crate::pipeline::GenerationStream;
use crate::toolcall;

/// Terminal frame of every stream.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Encode one `data:` frame.
pub fn sse_frame(payload: &impl Serialize) -> Bytes {
    match serde_json::to_string(payload) {
        Ok(json) => Bytes::from(format!("data: {json}\n\n")),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode SSE frame");
            Bytes::new()
        }
    }
}

/// Split `text` into pieces of at most `size` characters.
pub fn char_chunks(text: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (i, _) in text.char_indices() {
        if count == size {
            pieces.push(&text[start..i]);
            start = i;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// How a stream ended, for request logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutcome {
    /// `None` when the client went away before the stream finished.
    pub finish_reason: Option<FinishReason>,
    pub completion_chars: usize,
    pub time_to_first_token: Option<Duration>,
}

/// The receiving side of the connection is gone.
struct ClientGone;

struct ChunkWriter<'a> {
    ctx: &'a ResponseContext,
    tx: mpsc::Sender<Bytes>,
    tool_args_chunk_chars: usize,
    completion_chars: usize,
    started: Instant,
    first_token: Option<Duration>,
}

impl<'a> ChunkWriter<'a> {
    async fn send(&self, frame: Bytes) -> Result<(), ClientGone> {
        self.tx.send(frame).await.map_err(|_| ClientGone)
    }

    async fn delta(&self, delta: Delta, finish_reason: Option<FinishReason>) -> Result<(), ClientGone> {
        self.send(sse_frame(&self.ctx.chunk(delta, finish_reason))).await
    }

    async fn role(&self) -> Result<(), ClientGone> {
        self.delta(
            Delta {
                role: Some(Role::Assistant),
                content: Some(String::new()),
                ..Default::default()
            },
            None,
        )
        .await
    }

    async fn content(&mut self, text: String) -> Result<(), ClientGone> {
        if text.is_empty() {
            return Ok(());
        }
        self.mark_first_token();
        self.completion_chars += text.chars().count();
        self.delta(
            Delta {
                content: Some(text),
                ..Default::default()
            },
            None,
        )
        .await
    }

    /// Replay buffered text as content deltas of bounded size.
    async fn replay(&mut self, text: &str, batch_chars: usize) -> Result<(), ClientGone> {
        for piece in char_chunks(text, batch_chars) {
            self.content(piece.to_string()).await?;
        }
        Ok(())
    }

    /// id/type, then name, then argument fragments.
    async fn tool_call(&mut self, index: usize, call: &ToolCall) -> Result<(), ClientGone> {
        self.mark_first_token();
        self.completion_chars +=
            call.function.name.chars().count() + call.function.arguments.chars().count();

        self.tool_delta(DeltaToolCall {
            index,
            id: Some(call.id.clone()),
            kind: Some(call.kind.clone()),
            function: None,
        })
        .await?;
        self.tool_delta(DeltaToolCall {
            index,
            function: Some(DeltaFunction {
                name: Some(call.function.name.clone()),
                arguments: None,
            }),
            ..Default::default()
        })
        .await?;

        let mut pieces = char_chunks(&call.function.arguments, self.tool_args_chunk_chars);
        if pieces.is_empty() {
            pieces.push("");
        }
        for piece in pieces {
            self.tool_delta(DeltaToolCall {
                index,
                function: Some(DeltaFunction {
                    name: None,
                    arguments: Some(piece.to_string()),
                }),
                ..Default::default()
            })
            .await?;
        }
        Ok(())
    }

    async fn tool_delta(&self, call: DeltaToolCall) -> Result<(), ClientGone> {
        self.delta(
            Delta {
                tool_calls: vec![call],
                ..Default::default()
            },
            None,
        )
        .await
    }

    async fn finish(&self, reason: FinishReason) -> Result<(), ClientGone> {
        self.delta(Delta::default(), Some(reason)).await?;
        if self.ctx.include_usage {
            let usage = Usage::estimate(self.ctx.prompt_chars, self.completion_chars);
            self.send(sse_frame(&self.ctx.usage_chunk(usage))).await?;
        }
        self.send(Bytes::from_static(DONE_FRAME)).await
    }

    fn mark_first_token(&mut self) {
        if self.first_token.is_none() {
            self.first_token = Some(self.started.elapsed());
        }
    }
}

/// Pending content between flushes.
///
/// The first non-empty text goes out immediately; later text is held
/// until it reaches `max_chars` or `interval` has passed since the last
/// flush.
struct Batcher {
    max_chars: usize,
    interval: Duration,
    pending: String,
    pending_chars: usize,
    first_sent: bool,
    last_flush: Instant,
}

impl Batcher {
    fn new(config: &StreamingConfig) -> Self {
        Self {
            max_chars: config.batch_max_chars.max(1),
            interval: config.batch_interval,
            pending: String::new(),
            pending_chars: 0,
            first_sent: false,
            last_flush: Instant::now(),
        }
    }

    /// Add text; returns a batch when one is due.
    fn push(&mut self, text: String) -> Option<String> {
        if text.is_empty() {
            return None;
        }
        if !self.first_sent {
            self.first_sent = true;
            self.last_flush = Instant::now();
            return Some(text);
        }
        self.pending_chars += text.chars().count();
        self.pending.push_str(&text);
        (self.pending_chars >= self.max_chars).then(|| self.take())
    }

    fn take(&mut self) -> String {
        self.last_flush = Instant::now();
        self.pending_chars = 0;
        std::mem::take(&mut self.pending)
    }

    fn deadline(&self) -> Option<Instant> {
        (!self.pending.is_empty()).then(|| self.last_flush + self.interval)
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Stream a completion as SSE frames into `tx`.
///
/// Returns once `[DONE]` is written or the client disconnects. Either way
/// `events` is dropped on return, which stops the backend.
pub async fn stream_completion(
    mut events: GenerationStream,
    ctx: ResponseContext,
    config: StreamingConfig,
    tx: mpsc::Sender<Bytes>,
) -> StreamOutcome {
    let mut writer = ChunkWriter {
        ctx: &ctx,
        tx,
        tool_args_chunk_chars: config.tool_args_chunk_chars,
        completion_chars: 0,
        started: Instant::now(),
        first_token: None,
    };

    let result = async {
        writer.role().await?;
        let reason = if ctx.parse_tool_calls {
            buffered(&mut events, &mut writer, &ctx, &config).await?
        } else {
            incremental(&mut events, &mut writer, &ctx, &config).await?
        };
        writer.finish(reason).await?;
        Ok::<_, ClientGone>(reason)
    }
    .await;

    let finish_reason = match result {
        Ok(reason) => Some(reason),
        Err(ClientGone) => {
            tracing::debug!(id = %ctx.id, "client disconnected mid-stream");
            None
        }
    };
    StreamOutcome {
        finish_reason,
        completion_chars: writer.completion_chars,
        time_to_first_token: writer.first_token,
    }
}

/// Forward text as it arrives, batched and stop-trimmed.
async fn incremental(
    events: &mut GenerationStream,
    writer: &mut ChunkWriter<'_>,
    ctx: &ResponseContext,
    config: &StreamingConfig,
) -> Result<FinishReason, ClientGone> {
    let mut matcher = StopMatcher::new(&ctx.stop);
    let mut batch = Batcher::new(config);

    loop {
        let deadline = batch.deadline();
        let next = tokio::select! {
            event = events.recv() => Some(event),
            _ = until(deadline) => None,
        };
        let Some(event) = next else {
            writer.content(batch.take()).await?;
            continue;
        };

        match event {
            Some(Ok(GenerationEvent::TextFragment(text))) => {
                let pushed = matcher.push(&text);
                if let Some(due) = batch.push(pushed.emit) {
                    writer.content(due).await?;
                }
                if pushed.stopped {
                    events.cancel();
                    writer.content(batch.take()).await?;
                    return Ok(FinishReason::Stop);
                }
            }
            Some(Ok(GenerationEvent::ToolCallEmitted { name, arguments })) => {
                events.cancel();
                let mut rest = batch.take();
                rest.push_str(&matcher.finish());
                writer.content(rest).await?;
                writer.tool_call(0, &native_call(name, arguments)).await?;
                return Ok(FinishReason::ToolCalls);
            }
            Some(Err(e)) => {
                tracing::warn!(id = %ctx.id, error = %e, "backend failed mid-stream");
                let mut rest = batch.take();
                rest.push_str(&matcher.finish());
                writer.content(rest).await?;
                return Ok(FinishReason::Error);
            }
            None => {
                let mut rest = batch.take();
                rest.push_str(&matcher.finish());
                writer.content(rest).await?;
                return Ok(FinishReason::Stop);
            }
        }
    }
}

/// Accumulate all text, then emit tool calls or replay it as content.
async fn buffered(
    events: &mut GenerationStream,
    writer: &mut ChunkWriter<'_>,
    ctx: &ResponseContext,
    config: &StreamingConfig,
) -> Result<FinishReason, ClientGone> {
    let mut matcher = StopMatcher::new(&ctx.stop);
    let mut text = String::new();
    let mut failed = false;

    while let Some(event) = events.recv().await {
        match event {
            Ok(GenerationEvent::TextFragment(fragment)) => {
                let pushed = matcher.push(&fragment);
                text.push_str(&pushed.emit);
                if pushed.stopped {
                    events.cancel();
                    break;
                }
            }
            Ok(GenerationEvent::ToolCallEmitted { name, arguments }) => {
                events.cancel();
                text.push_str(&matcher.finish());
                writer.replay(&text, config.batch_max_chars).await?;
                writer.tool_call(0, &native_call(name, arguments)).await?;
                return Ok(FinishReason::ToolCalls);
            }
            Err(e) => {
                tracing::warn!(id = %ctx.id, error = %e, "backend failed mid-stream");
                failed = true;
                break;
            }
        }
    }
    text.push_str(&matcher.finish());

    if !failed {
        if let Some(calls) = toolcall::parse(&text) {
            for (index, call) in calls.iter().enumerate() {
                writer.tool_call(index, call).await?;
            }
            return Ok(FinishReason::ToolCalls);
        }
    }

    writer.replay(&text, config.batch_max_chars).await?;
    Ok(if failed {
        FinishReason::Error
    } else {
        FinishReason::Stop
    })
}

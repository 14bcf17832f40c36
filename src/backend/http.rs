// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// HTTP backend for local OpenAI-compatible runtimes
//
// Talks to llama.cpp server, Ollama, LM Studio and similar over their
// `/v1` endpoints:
// - `completions`: flattened prompt to `/v1/completions`, no native tools
// - `chat`: role-tagged turns and tool schema to `/v1/chat/completions`

use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};

use super::sse::{SseData, SseLines, ToolCallBuffer};
use super::{
    BackendContext, BackendError, Capabilities, EventStream, GenerationBackend, GenerationEvent,
    GenerationRequest, Prompt,
};
use crate::config::{BackendApi, BackendConfig, ModelConfig};

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api: BackendApi,
    timeout: Option<Duration>,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: &BackendConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api: config.api,
            timeout: config.timeout_ms.map(Duration::from_millis),
        }
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches("/v1");
        match self.api {
            BackendApi::Completions => format!("{base}/v1/completions"),
            BackendApi::Chat => format!("{base}/v1/chat/completions"),
        }
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    fn capabilities(&self) -> Capabilities {
        match self.api {
            BackendApi::Completions => Capabilities {
                structured_turns: false,
                native_tools: false,
            },
            BackendApi::Chat => Capabilities {
                structured_turns: true,
                native_tools: true,
            },
        }
    }

    async fn create_context(
        &self,
        model: &ModelConfig,
    ) -> Result<Arc<dyn BackendContext>, BackendError> {
        Ok(Arc::new(HttpContext {
            client: self.client.clone(),
            url: self.endpoint(),
            api: self.api,
            model: model.backend_model.clone(),
            timeout: self.timeout,
        }))
    }
}

/// One conversation against the upstream. The runtime keeps its prompt
/// cache keyed by prefix, so reusing a context for a resumed session lets
/// it skip the shared part of the prompt.
struct HttpContext {
    client: reqwest::Client,
    url: String,
    api: BackendApi,
    model: String,
    timeout: Option<Duration>,
}

impl HttpContext {
    fn payload(&self, request: &GenerationRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "stream": true,
        });
        match &request.prompt {
            Prompt::Text(text) => {
                body["prompt"] = Value::from(text.as_str());
                body["cache_prompt"] = Value::Bool(true);
            }
            Prompt::Turns(messages) => {
                body["messages"] = json!(messages);
            }
        }
        if let Some(t) = request.sampling.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = request.sampling.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(n) = request.sampling.max_tokens {
            body["max_tokens"] = json!(n);
        }
        if self.api == BackendApi::Chat && !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
            if let Some(choice) = &request.tool_choice {
                body["tool_choice"] = choice.to_value();
            }
        }
        body
    }
}

#[async_trait]
impl BackendContext for HttpContext {
    async fn generate(&self, request: GenerationRequest) -> Result<EventStream, BackendError> {
        let payload = self.payload(&request);
        let send = self.client.post(&self.url).json(&payload).send();

        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| BackendError::Timeout(format!("no response within {limit:?}")))?,
            None => send.await,
        }
        .map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(e.to_string())
            } else {
                BackendError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(url = %self.url, model = %self.model, "backend stream opened");
        Ok(decode_stream(self.api, Box::pin(response.bytes_stream())))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

struct DecodeState {
    body: ByteStream,
    decoder: ChunkDecoder,
    queue: VecDeque<Result<GenerationEvent, BackendError>>,
    done: bool,
}

/// Lazily turn upstream bytes into events. Dropping the returned stream
/// drops the response and closes the upstream connection.
fn decode_stream(api: BackendApi, body: ByteStream) -> EventStream {
    let state = DecodeState {
        body,
        decoder: ChunkDecoder::new(api),
        queue: VecDeque::new(),
        done: false,
    };
    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.queue.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            let step = match state.body.next().await {
                Some(Ok(bytes)) => state.decoder.feed(&bytes),
                Some(Err(e)) => Err(BackendError::Unavailable(e.to_string())),
                None => {
                    state.done = true;
                    state.decoder.finish()
                }
            };
            match step {
                Ok(events) => state.queue.extend(events.into_iter().map(Ok)),
                Err(e) => {
                    state.done = true;
                    state.queue.push_back(Err(e));
                }
            }
            if state.decoder.finished {
                state.done = true;
            }
        }
    }))
}

/// Converts upstream chunk JSON into generation events.
struct ChunkDecoder {
    api: BackendApi,
    lines: SseLines,
    tool_buffers: BTreeMap<usize, ToolCallBuffer>,
    finished: bool,
}

impl ChunkDecoder {
    fn new(api: BackendApi) -> Self {
        Self {
            api,
            lines: SseLines::new(),
            tool_buffers: BTreeMap::new(),
            finished: false,
        }
    }

    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<GenerationEvent>, BackendError> {
        let mut events = Vec::new();
        for data in self.lines.push(bytes) {
            if self.finished {
                break;
            }
            self.handle(data, &mut events)?;
        }
        Ok(events)
    }

    fn finish(&mut self) -> Result<Vec<GenerationEvent>, BackendError> {
        let mut events = Vec::new();
        if let Some(data) = self.lines.finish() {
            if !self.finished {
                self.handle(data, &mut events)?;
            }
        }
        if !self.finished {
            self.flush_tool_calls(&mut events);
            self.finished = true;
        }
        Ok(events)
    }

    fn handle(&mut self, data: SseData, events: &mut Vec<GenerationEvent>) -> Result<(), BackendError> {
        let json = match data {
            SseData::Done => {
                self.flush_tool_calls(events);
                self.finished = true;
                return Ok(());
            }
            SseData::Json(json) => json,
        };
        let chunk: Value = serde_json::from_str(&json)
            .map_err(|e| BackendError::Protocol(format!("invalid chunk JSON: {e}")))?;

        if let Some(error) = chunk.get("error") {
            return Err(BackendError::Protocol(format!("upstream error: {error}")));
        }

        let choice = chunk.get("choices").and_then(|c| c.get(0));
        match self.api {
            BackendApi::Completions => {
                // OpenAI-compatible `choices[0].text`, or llama.cpp's native `content`.
                let text = choice
                    .and_then(|c| c.get("text"))
                    .or_else(|| chunk.get("content"))
                    .and_then(Value::as_str);
                if let Some(text) = text.filter(|t| !t.is_empty()) {
                    events.push(GenerationEvent::TextFragment(text.to_string()));
                }
            }
            BackendApi::Chat => {
                let Some(choice) = choice else {
                    return Ok(());
                };
                if let Some(delta) = choice.get("delta") {
                    if let Some(text) = delta.get("content").and_then(Value::as_str) {
                        if !text.is_empty() {
                            events.push(GenerationEvent::TextFragment(text.to_string()));
                        }
                    }
                    if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                        for call in calls {
                            self.accumulate_tool_delta(call)?;
                        }
                    }
                }
                if choice.get("finish_reason").and_then(Value::as_str).is_some() {
                    self.flush_tool_calls(events);
                }
            }
        }
        Ok(())
    }

    fn accumulate_tool_delta(&mut self, call: &Value) -> Result<(), BackendError> {
        let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
        let buffer = self.tool_buffers.entry(index).or_default();
        if let Some(function) = call.get("function") {
            if let Some(name) = function.get("name").and_then(Value::as_str) {
                buffer.name.push_str(name);
            }
            match function.get("arguments") {
                Some(Value::String(fragment)) => buffer.append_arguments(fragment)?,
                Some(Value::Object(map)) => {
                    buffer.append_arguments(&Value::Object(map.clone()).to_string())?
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Emit every buffered call. Arguments that cannot be decoded or
    /// salvaged are passed through as plain text.
    fn flush_tool_calls(&mut self, events: &mut Vec<GenerationEvent>) {
        for (_, buffer) in std::mem::take(&mut self.tool_buffers) {
            if buffer.name.is_empty() {
                continue;
            }
            let arguments = match buffer.parse_arguments() {
                Ok(arguments) => arguments,
                Err(e) => match buffer.recover_arguments() {
                    Some(arguments) => {
                        tracing::debug!(tool = %buffer.name, error = %e, "recovered malformed tool call arguments");
                        arguments
                    }
                    None => {
                        tracing::warn!(tool = %buffer.name, error = %e, "tool call arguments unusable, passing through as text");
                        if !buffer.arguments_json.is_empty() {
                            events.push(GenerationEvent::TextFragment(buffer.arguments_json));
                        }
                        continue;
                    }
                },
            };
            events.push(GenerationEvent::ToolCallEmitted {
                name: buffer.name,
                arguments,
            });
        }
    }
}

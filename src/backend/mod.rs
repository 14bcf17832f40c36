// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Generation backend abstraction
//
// A backend turns a prompt plus sampling parameters into a finite stream
// of `GenerationEvent`s. The gateway only ever talks to the traits below;
// concrete runtimes live in the submodules.

mod echo;
mod http;
mod sse;

pub use echo::EchoBackend;
pub use http::HttpBackend;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::Stream;
use serde_json::{Map, Value};

use crate::config::{BackendConfig, BackendKind, ModelConfig};
use crate::message::{Message, ToolChoice, ToolDefinition};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// One unit of backend output.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    TextFragment(String),
    ToolCallEmitted {
        name: String,
        arguments: Map<String, Value>,
    },
}

/// Errors raised while starting or draining a generation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend timed out: {0}")]
    Timeout(String),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed backend output: {0}")]
    Protocol(String),
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<GenerationEvent, BackendError>> + Send>>;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// What a backend can consume directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Accepts role-tagged turns instead of a flattened prompt.
    pub structured_turns: bool,
    /// Accepts a tool schema and emits `ToolCallEmitted`.
    pub native_tools: bool,
}

/// Prompt in the form the backend asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    Text(String),
    Turns(Vec<Message>),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SamplingParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: Prompt,
    pub sampling: SamplingParams,
    /// Tool schema for native backends. Empty otherwise.
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A runtime able to host generation contexts.
///
/// Implementations must be Send + Sync so they can be shared across
/// request handlers via `Arc`.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Allocate a context bound to `model`. Dropping the last handle
    /// releases whatever the runtime holds for it.
    async fn create_context(
        &self,
        model: &ModelConfig,
    ) -> Result<Arc<dyn BackendContext>, BackendError>;
}

/// A reusable generation context (the unit the session cache holds).
#[async_trait]
pub trait BackendContext: Send + Sync {
    /// Start a generation. Errors here happen before any output exists.
    async fn generate(&self, request: GenerationRequest) -> Result<EventStream, BackendError>;
}

/// Build the backend named by the config.
pub fn build_backend(config: &BackendConfig) -> Result<Arc<dyn GenerationBackend>, BackendError> {
    match config.kind {
        BackendKind::Echo => Ok(Arc::new(EchoBackend::new())),
        BackendKind::Http => Ok(Arc::new(HttpBackend::new(config)?)),
    }
}

/// Scripted backend for unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed list of events, recording every request it sees.
    pub struct ScriptedBackend {
        pub capabilities: Capabilities,
        pub events: Vec<Result<GenerationEvent, BackendError>>,
        pub fail_start: bool,
        pub contexts_created: AtomicUsize,
        pub requests: Arc<Mutex<Vec<GenerationRequest>>>,
        pub pulled: Arc<AtomicUsize>,
    }

    impl ScriptedBackend {
        pub fn text(fragments: &[&str]) -> Self {
            Self::events(
                fragments
                    .iter()
                    .map(|f| Ok(GenerationEvent::TextFragment(f.to_string())))
                    .collect(),
            )
        }

        pub fn events(events: Vec<Result<GenerationEvent, BackendError>>) -> Self {
            Self {
                capabilities: Capabilities::default(),
                events,
                fail_start: false,
                contexts_created: AtomicUsize::new(0),
                requests: Arc::new(Mutex::new(Vec::new())),
                pulled: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct ScriptedContext {
        events: Vec<Result<GenerationEvent, BackendError>>,
        fail_start: bool,
        requests: Arc<Mutex<Vec<GenerationRequest>>>,
        pulled: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        fn capabilities(&self) -> Capabilities {
            self.capabilities
        }

        async fn create_context(
            &self,
            _model: &ModelConfig,
        ) -> Result<Arc<dyn BackendContext>, BackendError> {
            self.contexts_created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(ScriptedContext {
                events: self.events.clone(),
                fail_start: self.fail_start,
                requests: self.requests.clone(),
                pulled: self.pulled.clone(),
            }))
        }
    }

    #[async_trait]
    impl BackendContext for ScriptedContext {
        async fn generate(&self, request: GenerationRequest) -> Result<EventStream, BackendError> {
            self.requests.lock().unwrap().push(request);
            if self.fail_start {
                return Err(BackendError::Unavailable("scripted start failure".into()));
            }
            let pulled = self.pulled.clone();
            let events = self.events.clone();
            Ok(Box::pin(futures_util::stream::iter(events).inspect(
                move |_| {
                    pulled.fetch_add(1, Ordering::SeqCst);
                },
            )))
        }
    }

    pub fn model(id: &str) -> ModelConfig {
        ModelConfig {
            id: id.to_string(),
            backend_model: id.to_string(),
            owned_by: "local".to_string(),
            available: true,
            aliases: Vec::new(),
        }
    }
}

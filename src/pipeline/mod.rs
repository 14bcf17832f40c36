// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Generation event pipeline
//
// Responsibilities:
// - Decide how tools reach the backend (native schema or prompt text)
// - Build the backend prompt from the request messages
// - Drive the backend stream on a worker task, forwarding events over a
//   bounded channel
// - Stop pulling from the backend as soon as the consumer goes away

mod prompt;

pub use prompt::{build_prompt, tool_instructions, ASSISTANT_CUE};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::backend::{
    BackendError, Capabilities, GenerationEvent, GenerationRequest, SamplingParams,
};
use crate::message::{ChatRequest, Message, ToolChoice, ToolDefinition};
use crate::session::SessionLease;

/// Events buffered between the worker and the encoder.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Everything the pipeline needs from a chat request.
#[derive(Debug, Clone)]
pub struct GenerationPlan {
    pub messages: Vec<Message>,
    pub sampling: SamplingParams,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
}

impl GenerationPlan {
    pub fn from_request(request: &ChatRequest) -> Self {
        Self {
            messages: request.messages.clone(),
            sampling: SamplingParams {
                temperature: request.temperature,
                top_p: request.top_p,
                max_tokens: request.max_tokens,
            },
            tools: request.tools.clone().unwrap_or_default(),
            tool_choice: request.tool_choice.clone(),
        }
    }

    /// Tools to offer: none when `tool_choice` is `none`, only the named
    /// function when one is forced.
    pub fn offered_tools(&self) -> Vec<ToolDefinition> {
        match &self.tool_choice {
            Some(ToolChoice::None) => Vec::new(),
            Some(ToolChoice::Function(name)) => self
                .tools
                .iter()
                .filter(|t| &t.function.name == name)
                .cloned()
                .collect(),
            _ => self.tools.clone(),
        }
    }
}

/// A backend request plus how its output must be interpreted.
#[derive(Debug, Clone)]
pub struct PreparedGeneration {
    pub request: GenerationRequest,
    /// Text must be buffered and run through the tool-call parser.
    pub parse_tool_calls: bool,
}

/// Shape `plan` for a backend with `capabilities`.
pub fn prepare(plan: &GenerationPlan, capabilities: Capabilities) -> PreparedGeneration {
    let offered = plan.offered_tools();
    let parse_tool_calls = !offered.is_empty() && !capabilities.native_tools;

    let instructions =
        parse_tool_calls.then(|| tool_instructions(&offered, plan.tool_choice.as_ref()));
    let prompt = build_prompt(
        &plan.messages,
        capabilities.structured_turns,
        instructions.as_deref(),
    );

    let (tools, tool_choice) = if capabilities.native_tools && !offered.is_empty() {
        (offered, plan.tool_choice.clone())
    } else {
        (Vec::new(), None)
    };

    PreparedGeneration {
        request: GenerationRequest {
            prompt,
            sampling: plan.sampling,
            tools,
            tool_choice,
        },
        parse_tool_calls,
    }
}

/// Receiving end of a running generation.
///
/// Dropping it cancels the worker, which releases the session lease.
pub struct GenerationStream {
    events: mpsc::Receiver<Result<GenerationEvent, BackendError>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl GenerationStream {
    /// Next event, or `None` once the backend is exhausted or cancelled.
    pub async fn recv(&mut self) -> Option<Result<GenerationEvent, BackendError>> {
        self.events.recv().await
    }

    /// Stop the backend without waiting for the stream to be dropped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Start a generation on the leased context.
///
/// Errors are start failures: nothing has been produced yet and the lease
/// has already been released.
pub async fn generate(
    lease: SessionLease,
    request: GenerationRequest,
) -> Result<GenerationStream, BackendError> {
    let mut backend_events = lease.context().generate(request).await?;

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    // The worker owns the lease; it is released when the worker exits.
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = backend_events.next() => next,
            };
            let Some(item) = next else {
                break;
            };
            let failed = item.is_err();
            let delivered = tokio::select! {
                biased;
                _ = token.cancelled() => false,
                sent = tx.send(item) => sent.is_ok(),
            };
            if !delivered || failed {
                break;
            }
        }
        if token.is_cancelled() {
            tracing::debug!(session_id = ?lease.session_id(), "generation cancelled");
        }
    });

    Ok(GenerationStream {
        events: rx,
        _guard: cancel.clone().drop_guard(),
        cancel,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{model, ScriptedBackend};
    use crate::backend::{BackendContext, EventStream, GenerationBackend, Prompt};
    use crate::config::SessionConfig;
    use crate::message::{FunctionDefinition, Role};
    use crate::session::SessionGate;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            kind: "function".into(),
            function: FunctionDefinition {
                name: name.into(),
                description: None,
                parameters: None,
            },
        }
    }

    fn plan(tools: Vec<ToolDefinition>, tool_choice: Option<ToolChoice>) -> GenerationPlan {
        GenerationPlan {
            messages: vec![Message::new(Role::User, "hi")],
            sampling: SamplingParams::default(),
            tools,
            tool_choice,
        }
    }

    fn session_config() -> SessionConfig {
        SessionConfig {
            capacity: 4,
            idle_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(10),
        }
    }

    const TEXT_ONLY: Capabilities = Capabilities {
        structured_turns: false,
        native_tools: false,
    };
    const NATIVE: Capabilities = Capabilities {
        structured_turns: true,
        native_tools: true,
    };

    #[test]
    fn no_tools_means_no_parsing() {
        let prepared = prepare(&plan(Vec::new(), None), TEXT_ONLY);
        assert!(!prepared.parse_tool_calls);
        assert!(prepared.request.tools.is_empty());
        assert!(matches!(prepared.request.prompt, Prompt::Text(_)));
    }

    #[test]
    fn text_backend_gets_instructions_and_parsing() {
        let prepared = prepare(&plan(vec![tool("lookup")], None), TEXT_ONLY);
        assert!(prepared.parse_tool_calls);
        assert!(prepared.request.tools.is_empty());
        let Prompt::Text(text) = prepared.request.prompt else {
            panic!("expected text prompt");
        };
        assert!(text.contains("lookup"));
        assert!(text.contains("tool_calls"));
    }

    #[test]
    fn native_backend_gets_schema() {
        let prepared = prepare(&plan(vec![tool("a"), tool("b")], Some(ToolChoice::Auto)), NATIVE);
        assert!(!prepared.parse_tool_calls);
        assert_eq!(prepared.request.tools.len(), 2);
        assert_eq!(prepared.request.tool_choice, Some(ToolChoice::Auto));
        let Prompt::Turns(turns) = prepared.request.prompt else {
            panic!("expected turns");
        };
        assert_eq!(turns.len(), 1);
    }

    #[test]
    fn tool_choice_none_disables_tools() {
        let prepared = prepare(&plan(vec![tool("a")], Some(ToolChoice::None)), TEXT_ONLY);
        assert!(!prepared.parse_tool_calls);
        let Prompt::Text(text) = prepared.request.prompt else {
            panic!("expected text prompt");
        };
        assert!(!text.contains("tool_calls"));
    }

    #[test]
    fn named_tool_choice_restricts_schema() {
        let prepared = prepare(
            &plan(vec![tool("a"), tool("b")], Some(ToolChoice::Function("b".into()))),
            NATIVE,
        );
        let names: Vec<_> = prepared.request.tools.iter().map(|t| t.function.name.as_str()).collect();
        assert_eq!(names, vec!["b"]);
    }

    #[tokio::test]
    async fn events_forwarded_in_order() {
        let backend = Arc::new(ScriptedBackend::text(&["a", "b", "c"]));
        let gate = SessionGate::new(backend.clone(), session_config());
        let lease = gate.acquire(None, &model("m")).await.unwrap();
        let prepared = prepare(&plan(Vec::new(), None), backend.capabilities());

        let mut stream = generate(lease, prepared.request).await.unwrap();
        let mut seen = Vec::new();
        while let Some(event) = stream.recv().await {
            match event.unwrap() {
                GenerationEvent::TextFragment(t) => seen.push(t),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn start_failure_releases_lease() {
        let mut backend = ScriptedBackend::text(&["x"]);
        backend.fail_start = true;
        let backend = Arc::new(backend);
        let gate = SessionGate::new(backend.clone(), session_config());
        drop(gate.acquire(Some("s"), &model("m")).await.unwrap());

        let lease = gate.acquire(Some("s"), &model("m")).await.unwrap();
        assert_eq!(gate.is_in_use("s"), Some(true));
        let prepared = prepare(&plan(Vec::new(), None), backend.capabilities());
        assert!(generate(lease, prepared.request).await.is_err());
        assert_eq!(gate.is_in_use("s"), Some(false));
    }

    #[tokio::test]
    async fn backend_error_ends_stream() {
        let backend = Arc::new(ScriptedBackend::events(vec![
            Ok(GenerationEvent::TextFragment("partial".into())),
            Err(BackendError::Protocol("boom".into())),
            Ok(GenerationEvent::TextFragment("never".into())),
        ]));
        let gate = SessionGate::new(backend.clone(), session_config());
        let lease = gate.acquire(None, &model("m")).await.unwrap();
        let prepared = prepare(&plan(Vec::new(), None), backend.capabilities());

        let mut stream = generate(lease, prepared.request).await.unwrap();
        assert!(stream.recv().await.unwrap().is_ok());
        assert!(stream.recv().await.unwrap().is_err());
        assert!(stream.recv().await.is_none());
    }

    /// Emits fragments forever, counting how many were pulled.
    struct EndlessBackend {
        pulled: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl GenerationBackend for EndlessBackend {
        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }

        async fn create_context(
            &self,
            _model: &crate::config::ModelConfig,
        ) -> Result<Arc<dyn BackendContext>, BackendError> {
            Ok(Arc::new(EndlessBackend {
                pulled: self.pulled.clone(),
            }))
        }
    }

    #[async_trait]
    impl BackendContext for EndlessBackend {
        async fn generate(&self, _request: GenerationRequest) -> Result<EventStream, BackendError> {
            let pulled = self.pulled.clone();
            Ok(Box::pin(futures_util::stream::unfold((), move |_| {
                let pulled = pulled.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    pulled.fetch_add(1, Ordering::SeqCst);
                    Some((Ok(GenerationEvent::TextFragment("tok ".into())), ()))
                }
            })))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_stream_stops_backend_and_releases_session() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let backend = Arc::new(EndlessBackend {
            pulled: pulled.clone(),
        });
        let gate = SessionGate::new(backend.clone(), session_config());
        drop(gate.acquire(Some("s"), &model("m")).await.unwrap());
        let lease = gate.acquire(Some("s"), &model("m")).await.unwrap();
        let prepared = prepare(&plan(Vec::new(), None), backend.capabilities());

        let mut stream = generate(lease, prepared.request).await.unwrap();
        for _ in 0..3 {
            stream.recv().await.unwrap().unwrap();
        }
        drop(stream);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_cancel = pulled.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(pulled.load(Ordering::SeqCst), after_cancel);
        assert_eq!(gate.is_in_use("s"), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_cancel_closes_stream() {
        let backend = Arc::new(EndlessBackend {
            pulled: Arc::new(AtomicUsize::new(0)),
        });
        let gate = SessionGate::new(backend.clone(), session_config());
        let lease = gate.acquire(None, &model("m")).await.unwrap();
        let prepared = prepare(&plan(Vec::new(), None), backend.capabilities());

        let mut stream = generate(lease, prepared.request).await.unwrap();
        stream.recv().await.unwrap().unwrap();
        stream.cancel();
        while stream.recv().await.is_some() {}
    }
}

// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Development backend: streams the last user message back word by word.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use super::{
    BackendContext, BackendError, Capabilities, EventStream, GenerationBackend, GenerationEvent,
    GenerationRequest, Prompt,
};
use crate::config::ModelConfig;
use crate::message::Role;

#[derive(Debug, Clone, Default)]
pub struct EchoBackend {
    word_delay: Duration,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause between words, to make batching observable.
    pub fn with_word_delay(word_delay: Duration) -> Self {
        Self { word_delay }
    }
}

#[async_trait]
impl GenerationBackend for EchoBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            structured_turns: true,
            native_tools: false,
        }
    }

    async fn create_context(
        &self,
        _model: &ModelConfig,
    ) -> Result<Arc<dyn BackendContext>, BackendError> {
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl BackendContext for EchoBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<EventStream, BackendError> {
        let text = match request.prompt {
            Prompt::Turns(messages) => messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.text().to_string())
                .unwrap_or_default(),
            Prompt::Text(text) => text,
        };

        let mut words = split_words(&text);
        if let Some(limit) = request.sampling.max_tokens {
            words.truncate(limit as usize);
        }

        let delay = self.word_delay;
        Ok(Box::pin(stream::iter(words).then(move |word| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(GenerationEvent::TextFragment(word))
        })))
    }
}

/// Split into words, each keeping its trailing whitespace, so that
/// concatenating the pieces reproduces the input exactly.
fn split_words(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SamplingParams;
    use crate::message::Message;

    fn request(messages: Vec<Message>, max_tokens: Option<u32>) -> GenerationRequest {
        GenerationRequest {
            prompt: Prompt::Turns(messages),
            sampling: SamplingParams {
                max_tokens,
                ..Default::default()
            },
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    async fn drain(stream: EventStream) -> Vec<String> {
        stream
            .map(|e| match e.unwrap() {
                GenerationEvent::TextFragment(t) => t,
                other => panic!("unexpected event: {other:?}"),
            })
            .collect()
            .await
    }

    #[test]
    fn split_words_roundtrips() {
        let text = "hello  wide\nworld ";
        assert_eq!(split_words(text).concat(), text);
        assert_eq!(split_words("a b"), vec!["a ", "b"]);
    }

    #[tokio::test]
    async fn echoes_last_user_message() {
        let backend = EchoBackend::new();
        let messages = vec![
            Message::new(Role::System, "be brief"),
            Message::new(Role::User, "first"),
            Message::new(Role::Assistant, "ok"),
            Message::new(Role::User, "hello there world"),
        ];
        let stream = backend.generate(request(messages, None)).await.unwrap();
        assert_eq!(drain(stream).await, vec!["hello ", "there ", "world"]);
    }

    #[tokio::test]
    async fn max_tokens_limits_words() {
        let backend = EchoBackend::new();
        let stream = backend
            .generate(request(vec![Message::new(Role::User, "a b c d")], Some(2)))
            .await
            .unwrap();
        assert_eq!(drain(stream).await.concat(), "a b ");
    }

    #[tokio::test(start_paused = true)]
    async fn word_delay_spaces_fragments() {
        let backend = EchoBackend::with_word_delay(Duration::from_millis(50));
        let start = tokio::time::Instant::now();
        let stream = backend
            .generate(request(vec![Message::new(Role::User, "x y z")], None))
            .await
            .unwrap();
        drain(stream).await;
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}

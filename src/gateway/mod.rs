// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Ingress router
//
// Responsibilities:
// - Path normalization across the known API prefixes
// - Endpoint dispatch (root, health, models, chat completions)
// - HEAD and OPTIONS handling, CORS on every response
// - Chat completions: decode, resolve model, lease a session, generate
// - OpenAI-shaped error bodies for every failure

pub mod cors;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderName, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::backend::GenerationBackend;
use crate::config::{Config, StreamingConfig};
use crate::pipeline::{self, GenerationPlan, GenerationStream};
use crate::registry::ModelRegistry;
use crate::request::{decode_chat_request, ApiError, RequestError};
use crate::session::SessionGate;
use crate::stream::{self, ResponseContext};

/// Address the gateway binds to. Always localhost.
pub const BIND_HOST: [u8; 4] = [127, 0, 0, 1];

/// Body returned by `GET /`.
pub const ROOT_MESSAGE: &str = "mooring is running";

/// Frames buffered between the encoder task and the connection.
pub const SSE_CHANNEL_CAPACITY: usize = 32;

/// Prefixes stripped before matching, longest first.
const PATH_PREFIXES: [&str; 5] = ["/openai/v1", "/api/v1", "/openai", "/api", "/v1"];

// ---------------------------------------------------------------------------
// Endpoint resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Root,
    Health,
    Models,
    ChatCompletions,
}

impl Endpoint {
    pub fn method(self) -> Method {
        match self {
            Endpoint::ChatCompletions => Method::POST,
            _ => Method::GET,
        }
    }
}

/// Strip one known prefix and any trailing slashes.
pub fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    for prefix in PATH_PREFIXES {
        if trimmed == prefix {
            return "/";
        }
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            if rest.starts_with('/') {
                return rest;
            }
        }
    }
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

pub fn resolve_endpoint(path: &str) -> Option<Endpoint> {
    match normalize_path(path) {
        "/" => Some(Endpoint::Root),
        "/health" => Some(Endpoint::Health),
        "/models" => Some(Endpoint::Models),
        "/chat/completions" => Some(Endpoint::ChatCompletions),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Shared state injected into axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<dyn ModelRegistry>,
    pub sessions: Arc<SessionGate>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<dyn ModelRegistry>,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        let sessions = Arc::new(SessionGate::new(backend, config.sessions.clone()));
        Self {
            config,
            registry,
            sessions,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Entry point for every request.
pub async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    let method = request.method().clone();
    if method == Method::OPTIONS {
        return cors::options(&state.config.server, request.headers());
    }

    let origin = request.headers().get(ORIGIN).cloned();
    let mut response = route(&state, method, request).await;
    cors::apply_allow_origin(
        response.headers_mut(),
        &state.config.server.cors_origins,
        origin.as_ref(),
    );
    response
}

async fn route(state: &AppState, method: Method, request: Request<Body>) -> Response {
    if method == Method::HEAD {
        return StatusCode::NO_CONTENT.into_response();
    }

    let path = request.uri().path().to_string();
    match resolve_endpoint(&path) {
        Some(endpoint) if endpoint.method() == method => match endpoint {
            Endpoint::Root => ROOT_MESSAGE.into_response(),
            Endpoint::Health => health().into_response(),
            Endpoint::Models => list_models(state).await.into_response(),
            Endpoint::ChatCompletions => match chat_completions(state, request).await {
                Ok(response) => response,
                Err(e) => {
                    if e.status().is_server_error() {
                        tracing::error!(error = %e, "chat completion failed");
                    } else {
                        tracing::info!(error = %e, status = e.status().as_u16(), "chat completion rejected");
                    }
                    e.into_response()
                }
            },
        },
        _ => ApiError::NotFound {
            method: method.to_string(),
            path,
        }
        .into_response(),
    }
}

fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[derive(Serialize)]
struct ModelList {
    object: &'static str,
    data: Vec<ModelObject>,
}

#[derive(Serialize)]
struct ModelObject {
    id: String,
    object: &'static str,
    created: i64,
    owned_by: String,
}

async fn list_models(state: &AppState) -> Json<ModelList> {
    let data = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|card| ModelObject {
            id: card.id,
            object: "model",
            created: card.created,
            owned_by: card.owned_by,
        })
        .collect();
    Json(ModelList {
        object: "list",
        data,
    })
}

/// Chat completion handler.
///
/// Every check that can fail with a 4xx runs before a context is acquired,
/// so rejected requests never touch the backend.
async fn chat_completions(state: &AppState, request: Request<Body>) -> Result<Response, ApiError> {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let (parts, body) = request.into_parts();

    let body = axum::body::to_bytes(body, state.config.server.max_body_bytes)
        .await
        .map_err(|e| RequestError::Invalid {
            message: format!("failed to read request body: {e}"),
            param: None,
        })?;
    let chat = decode_chat_request(&body, &parts.headers)?;

    let model = state
        .registry
        .resolve(&chat.model)
        .await
        .ok_or_else(|| ApiError::ModelNotFound(chat.model.clone()))?;

    let lease = state
        .sessions
        .acquire(chat.session_id.as_deref(), &model)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to create context: {e}")))?;
    let reused = lease.reused();

    let plan = GenerationPlan::from_request(&chat);
    let prepared = pipeline::prepare(&plan, state.sessions.backend().capabilities());
    let events = pipeline::generate(lease, prepared.request)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to start generation: {e}")))?;

    let mut ctx = ResponseContext::new(chat.model.clone(), stream::prompt_chars(&chat.messages));
    ctx.stop = chat.stop.as_slice().to_vec();
    ctx.parse_tool_calls = prepared.parse_tool_calls;
    ctx.include_usage = chat.include_usage();

    tracing::info!(
        request_id = %request_id,
        model = %model.id,
        session_id = ?chat.session_id,
        reused,
        stream = chat.stream,
        "chat completion started"
    );

    if chat.stream {
        return Ok(sse_response(
            events,
            ctx,
            state.config.streaming.clone(),
            request_id,
            started,
        ));
    }

    let completion = stream::collect_completion(events, &ctx)
        .await
        .map_err(|e| ApiError::Internal(format!("generation failed: {e}")))?;
    tracing::info!(
        request_id = %request_id,
        finish_reason = ?completion.choices[0].finish_reason,
        completion_tokens = completion.usage.completion_tokens,
        latency_ms = millis(started.elapsed()),
        "chat completion finished"
    );
    Ok(Json(completion).into_response())
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Return the SSE response now; a background task writes the frames.
fn sse_response(
    events: GenerationStream,
    ctx: ResponseContext,
    config: StreamingConfig,
    request_id: String,
    started: Instant,
) -> Response {
    let (tx, rx) = mpsc::channel::<Bytes>(SSE_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let outcome = stream::stream_completion(events, ctx, config, tx).await;
        tracing::info!(
            request_id = %request_id,
            finish_reason = ?outcome.finish_reason,
            completion_chars = outcome.completion_chars,
            ttft_ms = outcome.time_to_first_token.map(millis),
            latency_ms = millis(started.elapsed()),
            "chat completion stream finished"
        );
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    (
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache, no-transform"),
            (CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        body,
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Build the axum router. Every request goes through `dispatch`.
pub fn build_router(state: AppState) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

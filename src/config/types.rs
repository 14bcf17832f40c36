// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level parsed and validated gateway config.
#[derive(Debug, Clone)]
pub struct Config {
    /// Config format version. Always "v1".
    pub version: String,
    pub server: ServerConfig,
    pub sessions: SessionConfig,
    pub streaming: StreamingConfig,
    pub backend: BackendConfig,
    /// Models exposed through the registry, in declaration order.
    pub models: Vec<ModelConfig>,
    /// SHA256 hash of the raw YAML: "sha256:{hex}".
    pub config_hash: String,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// HTTP ingress settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port on 127.0.0.1 to listen on.
    pub port: u16,
    /// Allowed CORS origins. `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    pub cors_max_age_secs: u64,
    /// Upper bound for a request body read into memory.
    pub max_body_bytes: usize,
}

/// Session Gate sizing.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum cached sessions. Zero disables caching.
    pub capacity: usize,
    /// Entries idle for longer than this are evicted.
    pub idle_ttl: Duration,
    /// Period of the background sweeper.
    pub sweep_interval: Duration,
}

/// SSE batching knobs.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Flush pending content once it reaches this many characters.
    pub batch_max_chars: usize,
    /// Flush pending content at most this long after the previous flush.
    pub batch_interval: Duration,
    /// Maximum characters of tool-call arguments per delta frame.
    pub tool_args_chunk_chars: usize,
}

/// Which generation backend to drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// Local OpenAI-compatible runtime reached over HTTP.
    Http,
    /// Built-in development backend that echoes the last user message.
    Echo,
}

/// Upstream API flavour for the HTTP backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendApi {
    /// `/v1/completions` with a manually formatted prompt.
    Completions,
    /// `/v1/chat/completions` with structured turns and native tools.
    Chat,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Base URL of the upstream runtime (HTTP backend only).
    pub base_url: String,
    pub api: BackendApi,
    /// Per-request upstream timeout.
    pub timeout_ms: Option<u64>,
}

/// A model entry served by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Public model id clients send in `model`.
    pub id: String,
    /// Identifier passed to the backend.
    pub backend_model: String,
    pub owned_by: String,
    /// Whether the weights are present locally.
    pub available: bool,
    /// Extra names that resolve to this model.
    pub aliases: Vec<String>,
}

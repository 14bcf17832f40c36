// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use super::types::{
    BackendApi, BackendConfig, BackendKind, Config, ModelConfig, ServerConfig, SessionConfig,
    StreamingConfig,
};

pub const DEFAULT_PORT: u16 = 11435;
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 600;
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub const DEFAULT_SESSION_CAPACITY: usize = 8;
pub const DEFAULT_SESSION_IDLE_TTL_SECS: u64 = 900;
pub const DEFAULT_SESSION_SWEEP_SECS: u64 = 60;

pub const DEFAULT_BATCH_MAX_CHARS: usize = 32;
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 30;
pub const DEFAULT_TOOL_ARGS_CHUNK_CHARS: usize = 64;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8080";

/// Model id served when no config file is present.
pub const ECHO_MODEL_ID: &str = "echo";

pub fn default_server_config() -> ServerConfig {
    ServerConfig {
        port: DEFAULT_PORT,
        cors_origins: vec!["*".to_string()],
        cors_max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
        max_body_bytes: DEFAULT_MAX_BODY_BYTES,
    }
}

pub fn default_session_config() -> SessionConfig {
    SessionConfig {
        capacity: DEFAULT_SESSION_CAPACITY,
        idle_ttl: Duration::from_secs(DEFAULT_SESSION_IDLE_TTL_SECS),
        sweep_interval: Duration::from_secs(DEFAULT_SESSION_SWEEP_SECS),
    }
}

pub fn default_streaming_config() -> StreamingConfig {
    StreamingConfig {
        batch_max_chars: DEFAULT_BATCH_MAX_CHARS,
        batch_interval: Duration::from_millis(DEFAULT_BATCH_INTERVAL_MS),
        tool_args_chunk_chars: DEFAULT_TOOL_ARGS_CHUNK_CHARS,
    }
}

pub fn default_backend_config() -> BackendConfig {
    BackendConfig {
        kind: BackendKind::Echo,
        base_url: DEFAULT_BACKEND_URL.to_string(),
        api: BackendApi::Completions,
        timeout_ms: None,
    }
}

/// Built-in config used when no config file exists: echo backend, one model.
/// A gateway without a file should still answer requests end to end.
pub fn default_config() -> Config {
    Config {
        version: "v1".to_string(),
        server: default_server_config(),
        sessions: default_session_config(),
        streaming: default_streaming_config(),
        backend: default_backend_config(),
        models: vec![ModelConfig {
            id: ECHO_MODEL_ID.to_string(),
            backend_model: ECHO_MODEL_ID.to_string(),
            owned_by: "mooring".to_string(),
            available: true,
            aliases: Vec::new(),
        }],
        config_hash: "builtin".to_string(),
    }
}

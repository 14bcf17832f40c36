// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Raw YAML deserialization types (internal)
// Kept separate from the public Config structs so that interpolation and
// validation happen between parsing and the typed config.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub mooring: String,
    pub server: Option<RawServerConfig>,
    pub sessions: Option<RawSessionConfig>,
    pub streaming: Option<RawStreamingConfig>,
    pub backend: Option<RawBackendConfig>,
    #[serde(default)]
    pub models: Vec<RawModelConfig>,
}

#[derive(Debug, Deserialize)]
pub struct RawServerConfig {
    pub port: Option<u16>,
    pub cors_origins: Option<Vec<String>>,
    pub cors_max_age_secs: Option<u64>,
    pub max_body_bytes: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RawSessionConfig {
    pub capacity: Option<usize>,
    pub idle_ttl_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RawStreamingConfig {
    pub batch_max_chars: Option<usize>,
    pub batch_interval_ms: Option<u64>,
    pub tool_args_chunk_chars: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RawBackendConfig {
    pub kind: String,
    pub base_url: Option<String>,
    pub api: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RawModelConfig {
    pub id: String,
    pub backend_model: Option<String>,
    pub owned_by: Option<String>,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default)]
    pub aliases: Vec<String>,
}

fn default_true() -> bool {
    true
}

// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::time::Duration;

use sha2::{Digest, Sha256};

use super::defaults::{
    default_backend_config, default_config, default_server_config, default_session_config,
    default_streaming_config,
};
use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::raw;
use super::source::{ConfigSource, FileSource};
use super::types::*;

/// Load and validate a mooring config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Compute SHA256 config hash
/// 3. Parse YAML into raw deserialization types
/// 4. Resolve variable interpolation in string fields
/// 5. Validate and fill defaults into the typed Config
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let config_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.mooring != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported config version \"{}\", expected \"v1\"",
            raw.mooring
        )));
    }

    let server = build_server_config(raw.server)?;
    let sessions = build_session_config(raw.sessions)?;
    let streaming = build_streaming_config(raw.streaming)?;
    let backend = build_backend_config(raw.backend)?;
    let models = build_models(raw.models)?;

    Ok(Config {
        version: raw.mooring,
        server,
        sessions,
        streaming,
        backend,
        models,
        config_hash,
    })
}

/// Load from `path` if it exists, otherwise fall back to the built-in config.
///
/// A file that exists but fails to parse is still an error.
pub fn load_or_default(path: &std::path::Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(default_config());
    }
    load_config(&FileSource {
        path: path.to_path_buf(),
    })
}

pub fn compute_hash(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    let hash = hasher.finalize();
    format!("sha256:{:x}", hash)
}

fn build_server_config(raw: Option<raw::RawServerConfig>) -> Result<ServerConfig, ConfigError> {
    let defaults = default_server_config();
    let raw = match raw {
        Some(r) => r,
        None => return Ok(defaults),
    };

    let cors_origins = match raw.cors_origins {
        Some(origins) => origins
            .iter()
            .map(|o| resolve_variables(o).map(|o| o.trim_end_matches('/').to_string()))
            .collect::<Result<Vec<_>, _>>()?,
        None => defaults.cors_origins,
    };

    let max_body_bytes = raw.max_body_bytes.unwrap_or(defaults.max_body_bytes);
    if max_body_bytes == 0 {
        return Err(ConfigError::Validation(
            "server.max_body_bytes must be > 0".into(),
        ));
    }

    Ok(ServerConfig {
        port: raw.port.unwrap_or(defaults.port),
        cors_origins,
        cors_max_age_secs: raw.cors_max_age_secs.unwrap_or(defaults.cors_max_age_secs),
        max_body_bytes,
    })
}

fn build_session_config(raw: Option<raw::RawSessionConfig>) -> Result<SessionConfig, ConfigError> {
    let defaults = default_session_config();
    let raw = match raw {
        Some(r) => r,
        None => return Ok(defaults),
    };

    let sweep_interval = match raw.sweep_interval_secs {
        Some(0) => {
            return Err(ConfigError::Validation(
                "sessions.sweep_interval_secs must be > 0".into(),
            ))
        }
        Some(secs) => Duration::from_secs(secs),
        None => defaults.sweep_interval,
    };

    Ok(SessionConfig {
        capacity: raw.capacity.unwrap_or(defaults.capacity),
        idle_ttl: raw
            .idle_ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.idle_ttl),
        sweep_interval,
    })
}

fn build_streaming_config(
    raw: Option<raw::RawStreamingConfig>,
) -> Result<StreamingConfig, ConfigError> {
    let defaults = default_streaming_config();
    let raw = match raw {
        Some(r) => r,
        None => return Ok(defaults),
    };

    let batch_max_chars = raw.batch_max_chars.unwrap_or(defaults.batch_max_chars);
    if batch_max_chars < 1 {
        return Err(ConfigError::Validation(
            "streaming.batch_max_chars must be >= 1".into(),
        ));
    }
    let tool_args_chunk_chars = raw
        .tool_args_chunk_chars
        .unwrap_or(defaults.tool_args_chunk_chars);
    if tool_args_chunk_chars < 1 {
        return Err(ConfigError::Validation(
            "streaming.tool_args_chunk_chars must be >= 1".into(),
        ));
    }

    Ok(StreamingConfig {
        batch_max_chars,
        batch_interval: raw
            .batch_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.batch_interval),
        tool_args_chunk_chars,
    })
}

fn build_backend_config(raw: Option<raw::RawBackendConfig>) -> Result<BackendConfig, ConfigError> {
    let defaults = default_backend_config();
    let raw = match raw {
        Some(r) => r,
        None => return Ok(defaults),
    };

    let kind = match raw.kind.as_str() {
        "http" => BackendKind::Http,
        "echo" => BackendKind::Echo,
        other => {
            return Err(ConfigError::Validation(format!(
                "unknown backend kind \"{other}\", expected \"http\" or \"echo\""
            )));
        }
    };

    let api = match raw.api.as_deref() {
        Some("completions") | None => BackendApi::Completions,
        Some("chat") => BackendApi::Chat,
        Some(other) => {
            return Err(ConfigError::Validation(format!(
                "unknown backend api \"{other}\", expected \"completions\" or \"chat\""
            )));
        }
    };

    let base_url = match raw.base_url {
        Some(url) => resolve_variables(&url)?,
        None if kind == BackendKind::Http => {
            return Err(ConfigError::Validation(
                "backend.base_url is required for the http backend".into(),
            ));
        }
        None => defaults.base_url,
    };
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "backend.base_url \"{base_url}\" must start with http:// or https://"
        )));
    }

    Ok(BackendConfig {
        kind,
        base_url: base_url.trim_end_matches('/').to_string(),
        api,
        timeout_ms: raw.timeout_ms,
    })
}

fn build_models(raw: Vec<raw::RawModelConfig>) -> Result<Vec<ModelConfig>, ConfigError> {
    if raw.is_empty() {
        return Err(ConfigError::Validation(
            "models must list at least one model".into(),
        ));
    }

    let mut seen = HashSet::new();
    let mut models = Vec::with_capacity(raw.len());
    for model in raw {
        if model.id.trim().is_empty() {
            return Err(ConfigError::Validation("models[].id must not be empty".into()));
        }
        for name in std::iter::once(&model.id).chain(model.aliases.iter()) {
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(ConfigError::Validation(format!(
                    "model name \"{name}\" is declared more than once"
                )));
            }
        }
        let backend_model = match model.backend_model {
            Some(name) => resolve_variables(&name)?,
            None => model.id.clone(),
        };
        models.push(ModelConfig {
            id: model.id,
            backend_model,
            owned_by: model.owned_by.unwrap_or_else(|| "local".to_string()),
            available: model.available,
            aliases: model.aliases,
        });
    }
    Ok(models)
}

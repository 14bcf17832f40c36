// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Model registry
//
// Maps client-facing model names to backend model identifiers. The
// gateway holds `Arc<dyn ModelRegistry>`; the config-backed
// implementation memoizes resolved names per instance.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::config::ModelConfig;

/// A row of `GET /models`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCard {
    pub id: String,
    pub owned_by: String,
    pub created: i64,
}

/// Name resolution for requested models.
///
/// Implementations must be Send + Sync so they can be shared across
/// request handlers via `Arc`.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Resolve a requested name. `None` if unknown or not available.
    async fn resolve(&self, name: &str) -> Option<ModelConfig>;

    /// Available models, in declaration order.
    async fn list(&self) -> Vec<ModelCard>;
}

/// Registry over the `models` section of the config.
///
/// Names match case-insensitively, a trailing `:latest` tag is ignored,
/// and aliases resolve to their model.
pub struct StaticModelRegistry {
    models: Vec<ModelConfig>,
    created: i64,
    name_cache: DashMap<String, usize>,
}

impl StaticModelRegistry {
    pub fn new(models: Vec<ModelConfig>) -> Self {
        Self {
            models,
            created: chrono::Utc::now().timestamp(),
            name_cache: DashMap::new(),
        }
    }

    /// Number of memoized names. Only names that resolved are kept, so
    /// this is bounded by the configured ids and aliases.
    pub fn cached_names(&self) -> usize {
        self.name_cache.len()
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        let key = normalize_name(name);
        if let Some(hit) = self.name_cache.get(&key) {
            return Some(*hit);
        }
        let found = self.models.iter().position(|model| {
            normalize_name(&model.id) == key
                || model.aliases.iter().any(|alias| normalize_name(alias) == key)
        })?;
        self.name_cache.insert(key, found);
        Some(found)
    }
}

fn normalize_name(name: &str) -> String {
    let lowered = name.trim().to_ascii_lowercase();
    match lowered.strip_suffix(":latest") {
        Some(base) => base.to_string(),
        None => lowered,
    }
}

#[async_trait]
impl ModelRegistry for StaticModelRegistry {
    async fn resolve(&self, name: &str) -> Option<ModelConfig> {
        let model = &self.models[self.lookup(name)?];
        if !model.available {
            tracing::debug!(model = %model.id, "requested model is not available");
            return None;
        }
        Some(model.clone())
    }

    async fn list(&self) -> Vec<ModelCard> {
        self.models
            .iter()
            .filter(|m| m.available)
            .map(|m| ModelCard {
                id: m.id.clone(),
                owned_by: m.owned_by.clone(),
                created: self.created,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str, available: bool, aliases: &[&str]) -> ModelConfig {
        ModelConfig {
            id: id.to_string(),
            backend_model: format!("{id}-q4"),
            owned_by: "local".to_string(),
            available,
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn registry() -> StaticModelRegistry {
        StaticModelRegistry::new(vec![
            model("llama3.1", true, &["llama"]),
            model("qwen2.5", false, &[]),
            model("phi3", true, &[]),
        ])
    }

    #[tokio::test]
    async fn resolves_exact_id() {
        let resolved = registry().resolve("llama3.1").await.unwrap();
        assert_eq!(resolved.backend_model, "llama3.1-q4");
    }

    #[tokio::test]
    async fn resolves_case_insensitive_latest_and_alias() {
        let registry = registry();
        assert!(registry.resolve("LLAMA3.1:latest").await.is_some());
        assert_eq!(registry.resolve("llama").await.unwrap().id, "llama3.1");
    }

    #[tokio::test]
    async fn unknown_model_is_none() {
        assert!(registry().resolve("gpt-4o").await.is_none());
    }

    #[tokio::test]
    async fn unavailable_model_is_none_and_unlisted() {
        let registry = registry();
        assert!(registry.resolve("qwen2.5").await.is_none());
        let ids: Vec<String> = registry.list().await.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["llama3.1", "phi3"]);
    }

    #[tokio::test]
    async fn lookups_are_memoized_per_instance() {
        let registry = registry();
        registry.resolve("phi3").await;
        registry.resolve("PHI3").await;
        registry.resolve("missing").await;
        assert_eq!(registry.cached_names(), 1);

        let fresh = StaticModelRegistry::new(vec![model("phi3", true, &[])]);
        assert_eq!(fresh.cached_names(), 0);
    }

    #[tokio::test]
    async fn unknown_names_are_not_memoized() {
        let registry = StaticModelRegistry::new(vec![model("phi3", true, &["tiny"])]);
        for i in 0..10_000 {
            assert!(registry.resolve(&format!("ghost-{i}")).await.is_none());
        }
        assert_eq!(registry.cached_names(), 0);

        registry.resolve("tiny").await;
        registry.resolve("Phi3:latest").await;
        assert_eq!(registry.cached_names(), 2);
    }
}

//! Typed gateway settings.

use super::LoadResult;
use crate::adapter::{BackendAdapterConfig, BackendAdapterRegistry};
use crate::error::{BuildResult, ConfigurationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// What to do with a captured request that cannot be boosted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnboostablePolicy {
    /// Relay the upstream response unmodified.
    #[default]
    PassThrough,
    /// Answer `422` with a `NotBoostable` error body.
    Reject,
}

/// Settings for the proxy and the model server it talks to.
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostConfig {
    /// Interface the proxy listens on.
    pub host: String,
    pub port: u16,
    /// Search backend the proxy forwards to.
    pub upstream_host: String,
    pub upstream_port: u16,
    pub upstream_timeout_ms: u64,
    /// How long the owner waits for each worker to become ready.
    pub ready_timeout_ms: u64,
    /// Largest request body either server accepts.
    pub max_body_bytes: usize,
    /// Model identifier (canonical or legacy alias).
    pub model: String,
    /// Interface of the model server.
    pub model_host: String,
    pub model_port: u16,
    /// Where downloaded model artifacts are cached.
    pub data_dir: PathBuf,
    /// The proxy asks upstream for `topk * multiplier` candidates.
    pub multiplier: usize,
    pub unboostable: UnboostablePolicy,
    /// Extra adapters, or overrides of built-in ones by name.
    pub adapters: BTreeMap<String, BackendAdapterConfig>,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            upstream_host: "0.0.0.0".to_string(),
            upstream_port: 9200,
            upstream_timeout_ms: 30_000,
            ready_timeout_ms: 120_000,
            max_body_bytes: 1024 * 1024,
            model: "shuffle-model".to_string(),
            model_host: "127.0.0.1".to_string(),
            model_port: 53001,
            data_dir: PathBuf::from(".cache/boost"),
            multiplier: 5,
            unboostable: UnboostablePolicy::PassThrough,
            adapters: BTreeMap::new(),
        }
    }
}

impl BoostConfig {
    /// Load from an optional file plus `BOOST_*` environment overrides.
    pub fn load(path: Option<&str>) -> LoadResult<Self> {
        super::load_layered(path, Some("BOOST"))
    }

    /// Check scalar settings.
    pub fn validate(&self) -> BuildResult<()> {
        if self.multiplier == 0 {
            return Err(ConfigurationError::InvalidSetting(
                "multiplier",
                "must be at least 1".to_string(),
            ));
        }
        if self.upstream_timeout_ms == 0 {
            return Err(ConfigurationError::InvalidSetting(
                "upstream_timeout_ms",
                "must be greater than 0".to_string(),
            ));
        }
        if self.ready_timeout_ms == 0 {
            return Err(ConfigurationError::InvalidSetting(
                "ready_timeout_ms",
                "must be greater than 0".to_string(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigurationError::InvalidSetting(
                "max_body_bytes",
                "must be greater than 0".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigurationError::InvalidSetting("model", "cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Built-in adapters overlaid with the configured ones.
    pub fn adapter_registry(&self) -> BuildResult<BackendAdapterRegistry> {
        let mut registry = BackendAdapterRegistry::builtin();
        for (name, adapter) in &self.adapters {
            registry.register(name.clone(), adapter.clone())?;
        }
        Ok(registry)
    }

    pub fn upstream_url(&self) -> String {
        format!("http://{}:{}", self.upstream_host, self.upstream_port)
    }

    pub fn model_url(&self) -> String {
        format!("http://{}:{}", self.model_host, self.model_port)
    }
}

//! Model registry.
//!
//! Three tables describe every rerank model the gateway can load:
//!
//! - **class map**: model identifier → implementation name
//!   (`"pt-tinybert-msmarco"` → `"PtBertModel"`);
//! - **module map**: implementation name → module namespace
//!   (`"PtBertModel"` → `"models.pt_models.bert"`);
//! - **url map**: model identifier → artifact URL.
//!
//! Legacy identifiers are kept working through an alias table. Aliases never
//! chain: every alias points straight at a canonical identifier.
//!
//! [`ModelRegistryBuilder::build`] checks all of this exhaustively, so a
//! registry that exists is known to resolve every identifier it knows about.

use crate::error::{BuildResult, ConfigurationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fully resolved description of one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRegistration {
    /// Canonical identifier (aliases are resolved away).
    pub identifier: String,
    pub implementation_name: String,
    pub module_namespace: String,
    pub artifact_url: String,
}

/// Validated, immutable model registry.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    classes: BTreeMap<String, String>,
    modules: BTreeMap<String, String>,
    urls: BTreeMap<String, String>,
    aliases: BTreeMap<String, String>,
}

impl ModelRegistry {
    pub fn builder() -> ModelRegistryBuilder {
        ModelRegistryBuilder::default()
    }

    /// The stock catalogue of msmarco rerankers.
    pub fn builtin() -> Self {
        const STORAGE: &str = "https://storage.googleapis.com/koursaros";

        Self::builder()
            .register_module("QAModel", "models.qa")
            .register_module("ShuffleModel", "models.shuffle")
            .register_module("PtBertModel", "models.pt_models.bert")
            .register_module("TfBertModel", "models.tf_models.bert")
            .register_module("TfAlbertModel", "models.tf_models.albert")
            .register_module("PtDistilBertQAModel", "models.pt_models.distilbert_qa")
            .register_model(
                "tf-bert-base-uncased-msmarco",
                "TfBertModel",
                format!("{STORAGE}/bert-base-uncased-msmarco.tar.gz"),
            )
            .register_model(
                "tf-albert-tiny-uncased-msmarco",
                "TfAlbertModel",
                format!("{STORAGE}/albert-tiny-uncased-msmarco.tar.gz"),
            )
            .register_model(
                "tf-biobert-base-uncased-msmarco",
                "TfBertModel",
                format!("{STORAGE}/biobert-base-uncased-msmarco.tar.gz"),
            )
            .register_model(
                "pt-tinybert-msmarco",
                "PtBertModel",
                format!("{STORAGE}/pt-tinybert-msmarco.tar.gz"),
            )
            .register_model(
                "pt-bert-base-uncased-msmarco",
                "PtBertModel",
                format!("{STORAGE}/pt-bert-base-uncased-msmarco.tar.gz"),
            )
            .register_model("shuffle-model", "ShuffleModel", "https://example.com")
            // Identifiers from before the tf/pt split.
            .register_alias("bert-base-uncased-msmarco", "tf-bert-base-uncased-msmarco")
            .register_alias("albert-tiny-uncased-msmarco", "tf-albert-tiny-uncased-msmarco")
            .register_alias("biobert-base-uncased-msmarco", "tf-biobert-base-uncased-msmarco")
            .build()
            .expect("built-in model catalogue is consistent")
    }

    /// Map an alias to its canonical identifier; canonical ids map to themselves.
    pub fn canonical<'a>(&'a self, identifier: &'a str) -> &'a str {
        self.aliases
            .get(identifier)
            .map(String::as_str)
            .unwrap_or(identifier)
    }

    /// Resolve `identifier` (canonical or alias) to its registration.
    pub fn resolve(&self, identifier: &str) -> BuildResult<ModelRegistration> {
        let canonical = self.canonical(identifier);
        let implementation = self
            .classes
            .get(canonical)
            .ok_or_else(|| ConfigurationError::UnknownModel(identifier.to_string()))?;
        let module = self
            .modules
            .get(implementation)
            .ok_or_else(|| ConfigurationError::MissingModule {
                model: canonical.to_string(),
                implementation: implementation.clone(),
            })?;
        let url = self
            .urls
            .get(canonical)
            .ok_or_else(|| ConfigurationError::MissingArtifactUrl(canonical.to_string()))?;

        Ok(ModelRegistration {
            identifier: canonical.to_string(),
            implementation_name: implementation.clone(),
            module_namespace: module.clone(),
            artifact_url: url.clone(),
        })
    }

    /// Add an alias to an already-built registry.
    pub fn register_alias(&mut self, alias: &str, canonical: &str) -> BuildResult<()> {
        check_alias(&self.classes, &self.aliases, alias, canonical)?;
        self.aliases.insert(alias.to_string(), canonical.to_string());
        Ok(())
    }

    /// Canonical identifiers, sorted.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// `(alias, canonical)` pairs, sorted by alias.
    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(a, c)| (a.as_str(), c.as_str()))
    }

    /// Implementation names referenced by at least one model.
    pub fn implementations(&self) -> impl Iterator<Item = &str> {
        let mut names: Vec<&str> = self.classes.values().map(String::as_str).collect();
        names.sort_unstable();
        names.dedup();
        names.into_iter()
    }
}

/// Accumulates map entries; [`build`](Self::build) validates them together.
#[derive(Debug, Default)]
pub struct ModelRegistryBuilder {
    classes: BTreeMap<String, String>,
    modules: BTreeMap<String, String>,
    urls: BTreeMap<String, String>,
    aliases: Vec<(String, String)>,
}

impl ModelRegistryBuilder {
    /// Register a canonical model with its implementation and artifact URL.
    pub fn register_model(
        mut self,
        identifier: impl Into<String>,
        implementation: impl Into<String>,
        artifact_url: impl Into<String>,
    ) -> Self {
        let identifier = identifier.into();
        self.classes.insert(identifier.clone(), implementation.into());
        self.urls.insert(identifier, artifact_url.into());
        self
    }

    /// Register only the implementation of a model (no URL).
    pub fn register_class(mut self, identifier: impl Into<String>, implementation: impl Into<String>) -> Self {
        self.classes.insert(identifier.into(), implementation.into());
        self
    }

    pub fn register_url(mut self, identifier: impl Into<String>, artifact_url: impl Into<String>) -> Self {
        self.urls.insert(identifier.into(), artifact_url.into());
        self
    }

    pub fn register_module(mut self, implementation: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.modules.insert(implementation.into(), namespace.into());
        self
    }

    pub fn register_alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.push((alias.into(), canonical.into()));
        self
    }

    /// Validate every mapping and produce the registry.
    ///
    /// Every class-mapped identifier needs a module entry for its
    /// implementation and a URL entry for itself; every alias must point at a
    /// canonical identifier and must not shadow one.
    pub fn build(self) -> BuildResult<ModelRegistry> {
        for (identifier, implementation) in &self.classes {
            if !self.modules.contains_key(implementation) {
                return Err(ConfigurationError::MissingModule {
                    model: identifier.clone(),
                    implementation: implementation.clone(),
                });
            }
            if !self.urls.contains_key(identifier) {
                return Err(ConfigurationError::MissingArtifactUrl(identifier.clone()));
            }
        }

        let mut aliases = BTreeMap::new();
        for (alias, canonical) in self.aliases {
            check_alias(&self.classes, &aliases, &alias, &canonical)?;
            aliases.insert(alias, canonical);
        }

        Ok(ModelRegistry {
            classes: self.classes,
            modules: self.modules,
            urls: self.urls,
            aliases,
        })
    }
}

fn check_alias(
    classes: &BTreeMap<String, String>,
    aliases: &BTreeMap<String, String>,
    alias: &str,
    canonical: &str,
) -> BuildResult<()> {
    if aliases.contains_key(canonical) {
        return Err(ConfigurationError::AliasChain {
            alias: alias.to_string(),
            target: canonical.to_string(),
        });
    }
    if !classes.contains_key(canonical) {
        return Err(ConfigurationError::UnknownModel(canonical.to_string()));
    }
    if classes.contains_key(alias) {
        return Err(ConfigurationError::AliasShadowsModel(alias.to_string()));
    }
    Ok(())
}

//! Model server: hosts one reranker behind HTTP.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness check. |
//! | `POST` | `/rank` | `{query, choices: [str]}` → `{ranks: [usize]}` |
//! | `GET`  | `/model` | The resolved model registration. |
//!
//! The model is loaded in [`GatewayService::startup`]: the identifier is
//! resolved through the [`ModelRegistry`], its implementation is looked up in
//! the [`ModelCatalog`], the artifact is fetched when the implementation
//! needs weights, and the reranker is built. Any failure keeps the server
//! from becoming ready.

use crate::artifact::ArtifactCache;
use crate::error::{HandlerError, HandlerResult};
use crate::pipeline::{DEFAULT_MAX_BODY_BYTES, HandlerRequest, Reply};
use crate::rerank::{RankRequest, RankResponse};
use crate::router::{HandlerFuture, RouteTable};
use crate::server::{GatewayService, base_routes};
use async_trait::async_trait;
use boost_kernel::config::BoostConfig;
use boost_kernel::rerank::{ShuffleReranker, validate_ranking};
use boost_kernel::{
    ArtifactFetcher, BuildResult, ConfigurationError, HttpMethod, ModelRegistration, ModelRegistry,
    Reranker,
};
use eyre::WrapErr;
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

// ─────────────────────────────────────────────────────────────────────────────
// ModelCatalog
// ─────────────────────────────────────────────────────────────────────────────

/// Builds a reranker from its registration and, when required, the local
/// artifact path.
pub type ModelBuilder = fn(&ModelRegistration, Option<&Path>) -> eyre::Result<Arc<dyn Reranker>>;

/// How to instantiate one implementation.
#[derive(Debug, Clone, Copy)]
pub struct ModelFactory {
    /// Whether the artifact has to be fetched before building.
    pub needs_artifact: bool,
    pub build: ModelBuilder,
}

/// Implementation name → factory.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    factories: BTreeMap<String, ModelFactory>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Implementations that ship with the gateway.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(
            "ShuffleModel",
            ModelFactory {
                needs_artifact: false,
                build: build_shuffle,
            },
        );
        catalog
    }

    pub fn register(&mut self, implementation: impl Into<String>, factory: ModelFactory) {
        self.factories.insert(implementation.into(), factory);
    }

    pub fn get(&self, implementation: &str) -> Option<&ModelFactory> {
        self.factories.get(implementation)
    }

    pub fn implementations(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Resolve `model` and make sure this catalog can build it.
    pub fn check(&self, registry: &ModelRegistry, model: &str) -> BuildResult<ModelRegistration> {
        let registration = registry.resolve(model)?;
        if self.get(&registration.implementation_name).is_none() {
            return Err(ConfigurationError::UnavailableImplementation(
                registration.implementation_name,
            ));
        }
        Ok(registration)
    }
}

fn build_shuffle(_registration: &ModelRegistration, _artifact: Option<&Path>) -> eyre::Result<Arc<dyn Reranker>> {
    Ok(Arc::new(ShuffleReranker::new()))
}

// ─────────────────────────────────────────────────────────────────────────────
// ModelServer
// ─────────────────────────────────────────────────────────────────────────────

struct LoadedModel {
    registration: ModelRegistration,
    reranker: Arc<dyn Reranker>,
}

/// Service hosting the configured reranker.
#[derive(Serialize)]
pub struct ModelServer {
    model: String,
    data_dir: PathBuf,
    max_body_bytes: usize,
    #[serde(skip)]
    registry: ModelRegistry,
    #[serde(skip)]
    catalog: ModelCatalog,
    #[serde(skip)]
    fetcher: Arc<dyn ArtifactFetcher>,
    #[serde(skip)]
    loaded: Option<LoadedModel>,
}

impl ModelServer {
    pub fn new(model: impl Into<String>, registry: ModelRegistry, catalog: ModelCatalog, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self {
            model: model.into(),
            data_dir: PathBuf::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            registry,
            catalog,
            fetcher,
            loaded: None,
        }
    }

    /// Built-in registry and catalog, artifacts cached under `data_dir`.
    pub fn from_config(config: &BoostConfig) -> Self {
        let mut server = Self::new(
            config.model.clone(),
            ModelRegistry::builtin(),
            ModelCatalog::builtin(),
            Arc::new(ArtifactCache::new(&config.data_dir)),
        );
        server.data_dir = config.data_dir.clone();
        server.max_body_bytes = config.max_body_bytes;
        server
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Registration of the loaded model, once started.
    pub fn registration(&self) -> Option<&ModelRegistration> {
        self.loaded.as_ref().map(|m| &m.registration)
    }

    fn reranker(&self) -> HandlerResult<&Arc<dyn Reranker>> {
        self.loaded
            .as_ref()
            .map(|m| &m.reranker)
            .ok_or_else(|| HandlerError::Internal("model is not loaded".to_string()))
    }

    async fn rank(self: Arc<Self>, req: HandlerRequest) -> HandlerResult<Reply> {
        let body: RankRequest = req.json()?;
        let ranks = self.reranker()?.score(&body.query, &body.choices).await?;
        validate_ranking(&ranks, body.choices.len())?;
        Ok(Reply::json(json!(RankResponse { ranks })))
    }

    async fn describe(self: Arc<Self>, _req: HandlerRequest) -> HandlerResult<Reply> {
        let registration = self
            .registration()
            .ok_or_else(|| HandlerError::Internal("model is not loaded".to_string()))?;
        Ok(Reply::json(json!(registration)))
    }
}

#[async_trait]
impl GatewayService for ModelServer {
    fn name(&self) -> &str {
        "model-server"
    }

    fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    fn routes() -> RouteTable<Self> {
        let mut table: RouteTable<Self> = base_routes();
        table
            .add_route(HttpMethod::Post, "/rank")
            .to(|svc, req| svc.rank(req).boxed());
        table
            .add_route(HttpMethod::Get, "/model")
            .to(|svc, req| svc.describe(req).boxed());
        table
    }

    async fn startup(&mut self) -> eyre::Result<()> {
        let registration = self.catalog.check(&self.registry, &self.model)?;
        let factory = *self
            .catalog
            .get(&registration.implementation_name)
            .ok_or_else(|| ConfigurationError::UnavailableImplementation(registration.implementation_name.clone()))?;

        let artifact = if factory.needs_artifact {
            let path = self
                .fetcher
                .fetch(&registration.artifact_url)
                .await
                .wrap_err_with(|| format!("failed to fetch artifact for '{}'", registration.identifier))?;
            Some(path)
        } else {
            None
        };

        let reranker = (factory.build)(&registration, artifact.as_deref())
            .wrap_err_with(|| format!("failed to build model '{}'", registration.identifier))?;

        info!(
            model = %registration.identifier,
            implementation = %registration.implementation_name,
            reranker = reranker.name(),
            "model loaded"
        );
        self.loaded = Some(LoadedModel {
            registration,
            reranker,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boost_kernel::ArtifactError;

    struct NoFetch;

    #[async_trait]
    impl ArtifactFetcher for NoFetch {
        async fn fetch(&self, url: &str) -> Result<PathBuf, ArtifactError> {
            Err(ArtifactError::Download {
                url: url.to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    #[test]
    fn builtin_catalog_builds_the_default_model() {
        let catalog = ModelCatalog::builtin();
        let registry = ModelRegistry::builtin();
        let registration = catalog.check(&registry, &BoostConfig::default().model).unwrap();
        assert_eq!(registration.implementation_name, "ShuffleModel");
    }

    #[test]
    fn check_reports_missing_implementations() {
        let catalog = ModelCatalog::builtin();
        let registry = ModelRegistry::builtin();
        assert_eq!(
            catalog.check(&registry, "bert-base-uncased-msmarco").unwrap_err(),
            ConfigurationError::UnavailableImplementation("TfBertModel".to_string())
        );
        assert!(matches!(
            catalog.check(&registry, "no-such-model"),
            Err(ConfigurationError::UnknownModel(_))
        ));
    }

    #[tokio::test]
    async fn startup_loads_shuffle_without_artifact() {
        let mut server = ModelServer::new(
            "shuffle-model",
            ModelRegistry::builtin(),
            ModelCatalog::builtin(),
            Arc::new(NoFetch),
        );
        server.startup().await.unwrap();
        assert_eq!(server.registration().unwrap().identifier, "shuffle-model");
    }

    #[tokio::test]
    async fn startup_fails_when_artifact_is_unavailable() {
        fn never(_: &ModelRegistration, _: Option<&Path>) -> eyre::Result<Arc<dyn Reranker>> {
            unreachable!("artifact fetch fails first")
        }

        let mut catalog = ModelCatalog::builtin();
        catalog.register(
            "TfBertModel",
            ModelFactory {
                needs_artifact: true,
                build: never,
            },
        );
        let mut server = ModelServer::new(
            "bert-base-uncased-msmarco",
            ModelRegistry::builtin(),
            catalog,
            Arc::new(NoFetch),
        );
        let err = server.startup().await.unwrap_err();
        assert!(format!("{err:?}").contains("offline"));
        assert!(server.registration().is_none());
    }
}

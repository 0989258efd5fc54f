//! `boost-kernel`: contracts and declarative building blocks of the
//! search-boosting gateway.
//!
//! Everything here is synchronous and free of network I/O; the runtime that
//! serves traffic lives in `boost-gateway`.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │               boost-kernel  (this crate)                     │
//! │  PathExpression / CapturePattern   BackendAdapterRegistry    │
//! │  ModelRegistry                     Reranker / ArtifactFetcher│
//! │  BoostConfig + loaders             ConfigurationError        │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │  depends on
//! ┌───────────────────────────▼──────────────────────────────────┐
//! │               boost-gateway  (runtime crate)                 │
//! │  RouteTable  RequestPipeline  Worker / ReadySignal           │
//! │  GatewayServer  BoostProxy  ModelServer  UpstreamBackend     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod model;
pub mod path;
pub mod rerank;
pub mod types;

pub use adapter::{BackendAdapterConfig, BackendAdapterRegistry, BoostFields, NotBoostable};
pub use error::{BuildResult, ConfigurationError};
pub use model::{ModelRegistration, ModelRegistry};
pub use path::{CapturePattern, PathExpression, Resolved};
pub use rerank::{ArtifactError, ArtifactFetcher, RerankError, Reranker};
pub use types::HttpMethod;

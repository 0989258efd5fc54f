//! `boost-gateway`: runtime of the search-boosting gateway.
//!
//! This crate serves traffic on top of the contracts in `boost-kernel`:
//!
//! | Piece | Type |
//! |-------|------|
//! | Route declaration and binding | [`router::RouteTable`] |
//! | Per-request choke point | [`pipeline::RequestPipeline`] |
//! | Isolated unit of execution | [`worker::Worker`] / [`worker::WorkerProcess`] |
//! | HTTP server worker | [`server::GatewayServer`] |
//! | Boosting proxy | [`proxy::BoostProxy`] |
//! | Model server | [`model_server::ModelServer`] |
//! | Upstream forwarding | [`backend::UpstreamBackend`] |
//!
//! # Quick start
//!
//! ```rust,no_run
//! use boost_gateway::proxy::BoostProxy;
//! use boost_gateway::server::GatewayServer;
//! use boost_gateway::worker::Worker;
//! use boost_kernel::config::BoostConfig;
//! use std::time::Duration;
//!
//! fn main() -> eyre::Result<()> {
//!     let config = BoostConfig::default();
//!     let proxy = GatewayServer::new(&config.host, config.port, BoostProxy::from_config(&config)?);
//!     let worker = Worker::new(proxy).enter()?;
//!     worker.wait_ready(Duration::from_secs(5))?;
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod backend;
pub mod error;
pub mod model_server;
pub mod pipeline;
pub mod proxy;
pub mod rerank;
pub mod router;
pub mod server;
pub mod worker;

// Re-export the kernel for convenience.
pub use boost_kernel as kernel;

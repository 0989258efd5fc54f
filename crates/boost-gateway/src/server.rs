//! HTTP server worker.
//!
//! [`GatewayServer`] is a [`WorkerProcess`] that owns its own event loop: on
//! its worker thread it builds a single-threaded tokio runtime, runs the
//! service's startup hook, binds the listener, raises readiness and serves
//! until cancelled.
//!
//! The axum app it serves has exactly one entry point, the
//! [`RequestPipeline`], installed as the router's fallback.
//!
//! # Base endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness check, always `200 OK`. |

use crate::error::HandlerResult;
use crate::pipeline::{DEFAULT_MAX_BODY_BYTES, HandlerRequest, Reply, RequestPipeline, pipeline_entry};
use crate::router::{BoundHandler, HandlerFuture, RouteTable};
use crate::worker::{WorkerContext, WorkerProcess};
use async_trait::async_trait;
use axum::Router;
use boost_kernel::HttpMethod;
use eyre::WrapErr;
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// A service the gateway can serve.
#[async_trait]
pub trait GatewayService: Serialize + Send + Sync + Sized + 'static {
    /// Name used in logs and in the health body.
    fn name(&self) -> &str;

    /// Route table of this service type; usually [`base_routes`] plus
    /// additions.
    fn routes() -> RouteTable<Self> {
        base_routes()
    }

    /// Runs on the worker's event loop before the listener is bound.
    /// An error here means the server never becomes ready.
    async fn startup(&mut self) -> eyre::Result<()> {
        Ok(())
    }

    /// Largest request body this service accepts.
    fn max_body_bytes(&self) -> usize {
        DEFAULT_MAX_BODY_BYTES
    }

    /// Handles requests no route matched.
    async fn not_found(&self, _req: HandlerRequest) -> HandlerResult<Reply> {
        Err(crate::error::HandlerError::NotFound)
    }
}

/// Routes every gateway service has.
pub fn base_routes<S: GatewayService>() -> RouteTable<S> {
    let mut table = RouteTable::new();
    table.add_route(HttpMethod::Get, "/health").to(health::<S>);
    table
}

/// `GET /health`: liveness probe.
fn health<S: GatewayService>(service: Arc<S>, _req: HandlerRequest) -> HandlerFuture {
    async move { Ok(Reply::json(json!({ "status": "ok", "service": service.name() }))) }.boxed()
}

/// Build the axum app for `service`.
pub fn build_app<S: GatewayService>(service: Arc<S>) -> Router {
    let routes = S::routes().bind_to(Arc::clone(&service));
    let name = service.name().to_string();
    let max_body_bytes = service.max_body_bytes();
    let not_found: BoundHandler = Arc::new(move |req| {
        let service = Arc::clone(&service);
        async move { service.not_found(req).await }.boxed()
    });
    let pipeline = RequestPipeline::new(name, routes, not_found).with_max_body_bytes(max_body_bytes);
    Router::new().fallback(pipeline_entry).with_state(pipeline)
}

/// HTTP server hosting one [`GatewayService`].
#[derive(Debug, Serialize)]
pub struct GatewayServer<S> {
    host: String,
    port: u16,
    #[serde(flatten)]
    service: S,
}

impl<S: GatewayService> GatewayServer<S> {
    pub fn new(host: impl Into<String>, port: u16, service: S) -> Self {
        Self {
            host: host.into(),
            port,
            service,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL clients use to reach this server.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Run the startup hook and build the app without binding anything.
    pub async fn prepare(self) -> eyre::Result<Router> {
        let mut service = self.service;
        service
            .startup()
            .await
            .wrap_err_with(|| format!("service '{}' failed to start", service.name()))?;
        Ok(build_app(Arc::new(service)))
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> eyre::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.prepare().await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .wrap_err("server terminated with an error")
    }
}

impl<S: GatewayService> WorkerProcess for GatewayServer<S> {
    fn name(&self) -> &str {
        self.service.name()
    }

    fn run(self, ctx: WorkerContext) -> eyre::Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .wrap_err("failed to build worker runtime")?;

        runtime.block_on(async move {
            let addr = format!("{}:{}", self.host, self.port);
            let name = self.service.name().to_string();
            let app = self.prepare().await?;

            let listener = TcpListener::bind(&addr)
                .await
                .wrap_err_with(|| format!("failed to bind {addr}"))?;
            let local = listener.local_addr().wrap_err("listener has no local address")?;

            info!(service = %name, addr = %local, "listening on {local}");
            ctx.ready().set();

            axum::serve(listener, app)
                .with_graceful_shutdown(ctx.cancellation().clone().cancelled_owned())
                .await
                .wrap_err("server terminated with an error")?;
            info!(service = %name, "server shut down");
            Ok(())
        })
    }
}

//! Boost gateway: entry point.
//!
//! Loads [`BoostConfig`], starts the model server and the boosting proxy as
//! two workers, waits for both to become ready and serves until Ctrl-C.
//!
//! # Environment variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BOOST_CONFIG` | *(none)* | Path of a YAML / TOML / JSON config file. |
//! | `BOOST_<FIELD>` | see [`BoostConfig`] | Overrides any top-level field, e.g. `BOOST_PORT=8100`. |
//! | `RUST_LOG` | `boost_gateway=info` | Log filter. |

use boost_gateway::model_server::{ModelCatalog, ModelServer};
use boost_gateway::proxy::BoostProxy;
use boost_gateway::server::GatewayServer;
use boost_gateway::worker::Worker;
use boost_kernel::ModelRegistry;
use boost_kernel::config::BoostConfig;
use eyre::WrapErr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> eyre::Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("boost_gateway=info".parse()?))
        .init();

    let config_path = std::env::var("BOOST_CONFIG").ok();
    let config = BoostConfig::load(config_path.as_deref()).wrap_err("failed to load configuration")?;
    config.validate()?;

    // Fail before spawning anything if the model cannot be served.
    let registration = ModelCatalog::builtin().check(&ModelRegistry::builtin(), &config.model)?;
    config.adapter_registry()?;

    info!(
        config_file = config_path.as_deref().unwrap_or("<none>"),
        model = %registration.identifier,
        upstream = %config.upstream_url(),
        "Boost gateway configuration loaded"
    );

    let ready_timeout = Duration::from_millis(config.ready_timeout_ms);

    let model_server = Worker::new(GatewayServer::new(
        &config.model_host,
        config.model_port,
        ModelServer::from_config(&config),
    ))
    .enter()?;
    model_server.wait_ready(ready_timeout)?;

    let proxy = Worker::new(GatewayServer::new(
        &config.host,
        config.port,
        BoostProxy::from_config(&config)?,
    ))
    .enter()?;
    proxy.wait_ready(ready_timeout)?;

    info!(port = config.port, "Boost gateway ready");

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(tokio::signal::ctrl_c())?;

    info!("shutting down");
    proxy.stop();
    model_server.stop();
    Ok(())
}

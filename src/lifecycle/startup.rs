//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the metrics exporter when enabled
//! - Bind the listener
//! - Spawn the server task wired to the shutdown coordinator
//!
//! # Design Decisions
//! - Fail fast: a bind error is returned before anything is spawned
//! - Logging is installed by the caller, before config errors can occur

use std::net::SocketAddr;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::lifecycle::Shutdown;
use crate::net::{Listener, ListenerError};
use crate::observability::metrics;
use crate::rpc::{RpcServer, ServerError, Service};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("listener: {0}")]
    Listener(#[from] ListenerError),

    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A server task accepting on `local_addr`.
#[derive(Debug)]
pub struct RunningServer {
    pub local_addr: SocketAddr,
    pub handle: JoinHandle<Result<(), ServerError>>,
}

/// Bind and spawn a server for `service`; it stops when `shutdown` triggers.
pub async fn start_server(
    config: &AppConfig,
    service: Service,
    shutdown: &Shutdown,
) -> Result<RunningServer, StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr);
    }

    let listener = Listener::bind(&config.server).await?;
    let local_addr = listener.local_addr()?;

    let server = RpcServer::new(service, config.server.clone());
    let shutdown_rx = shutdown.subscribe();
    let handle = tokio::spawn(server.run(listener, shutdown_rx));

    Ok(RunningServer { local_addr, handle })
}

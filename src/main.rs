//! traced-thrift server.
//!
//! ```text
//!     Client ──probe──▶ ┌──────────────────────────────────────────┐
//!                       │ net::Listener (connection limit)         │
//!                       │   → rpc::serve_connection                │
//!                       │       → protocol::TracedProtocol         │
//!                       │           (plain until upgraded)         │
//!                       │       → Service::route → handler         │
//!                       │           (inside the caller's trace)    │
//!                       └──────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use traced_thrift::config::loader::load_config;
use traced_thrift::config::AppConfig;
use traced_thrift::demo::greeter_service;
use traced_thrift::lifecycle::{signals, start_server, Shutdown};
use traced_thrift::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "traced-thrift")]
#[command(about = "Greeter server speaking Thrift with trace header upgrade", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Refuse the trace upgrade, behaving like a plain binary peer.
    #[arg(long)]
    no_upgrade: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    init_logging(&config.observability);
    tracing::info!("traced-thrift v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.server.bind_address,
        max_connections = config.server.max_connections,
        upgrade = !cli.no_upgrade,
        "Configuration loaded"
    );

    let service = greeter_service(!cli.no_upgrade)?;
    let shutdown = Shutdown::new();
    let running = start_server(&config, service, &shutdown).await?;
    tracing::info!(address = %running.local_addr, "Listening for connections");

    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    running.handle.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}

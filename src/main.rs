use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use revtun_api::{ApiServer, ApiServerConfig};
use revtun_manager::{ClientConfig, ClientManager, ManagerConfig};

/// Reverse-tunnel relay: hands out tunnel ports and pools client sockets
#[derive(Parser, Debug)]
#[command(name = "revtun")]
#[command(about = "Reverse-tunnel relay server")]
#[command(version)]
#[command(long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nCommit: ",
    env!("REVTUN_COMMIT"),
    "\nBuilt: ",
    env!("REVTUN_BUILD_TIME")
))]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Address of the provisioning API
    #[arg(long, env = "REVTUN_API_ADDR", default_value = "127.0.0.1:8080")]
    api_addr: SocketAddr,

    /// Enable CORS on the provisioning API for localhost origins
    #[arg(long)]
    cors: bool,

    /// Address tunnel ports bind to
    #[arg(long, env = "REVTUN_BIND_ADDR", default_value = "0.0.0.0")]
    bind_addr: IpAddr,

    /// First port of the tunnel port pool
    #[arg(long, env = "REVTUN_PORT_START", default_value = "8767")]
    port_start: u16,

    /// Number of tunnel ports, which caps concurrent tunnels
    #[arg(long, env = "REVTUN_PORT_COUNT", default_value = "10")]
    port_count: u16,

    /// Maximum sockets a client machine may open per tunnel
    #[arg(long, env = "REVTUN_MAX_SOCKETS", default_value = "10")]
    max_sockets: usize,

    /// Seconds a new tunnel waits for its first socket
    #[arg(long, env = "REVTUN_INITIAL_GRACE_SECS", default_value = "10")]
    initial_grace_secs: u64,

    /// Seconds a tunnel may stay without sockets before it is closed
    #[arg(long, env = "REVTUN_RECONNECT_GRACE_SECS", default_value = "5")]
    reconnect_grace_secs: u64,
}

impl Cli {
    fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            bind_addr: self.bind_addr,
            port_start: self.port_start,
            port_count: self.port_count,
            max_tcp_sockets: self.max_sockets,
            client: ClientConfig {
                initial_grace: Duration::from_secs(self.initial_grace_secs),
                reconnect_grace: Duration::from_secs(self.reconnect_grace_secs),
            },
        }
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let manager =
        ClientManager::new(cli.manager_config()).context("Invalid tunnel port configuration")?;

    let range = manager.port_range();
    info!(
        bind_addr = %manager.bind_addr(),
        port_start = range.start(),
        port_end = range.end(),
        "Relay ready"
    );

    let api = ApiServer::new(
        ApiServerConfig {
            bind_addr: cli.api_addr,
            enable_cors: cli.cors,
        },
        manager.clone(),
    );

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
        }
    };

    let result = api
        .start(shutdown)
        .await
        .context("Provisioning API failed");

    manager.shutdown();
    info!("Relay stopped");

    result
}

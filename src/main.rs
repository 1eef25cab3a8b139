//! wsrelay server
//!
//! Run with: cargo run --bin wsrelay -- --port 8080
//!
//! # Configuration
//!
//! Settings come from, in increasing precedence:
//! - the config file (`--config`, or the first of
//!   `~/.config/wsrelay/config.toml`, `/etc/wsrelay/config.toml`, `./wsrelay.toml`)
//! - `WSRELAY_*` environment variables
//! - command-line flags
//!
//! `RUST_LOG` overrides the configured log level.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use wsrelay::config::{generate_default_config, Config};
use wsrelay::server::{shutdown_signal, RelayServer, ShutdownPolicy};

#[derive(Parser)]
#[command(name = "wsrelay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "WebSocket relay server")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum concurrent clients (0 = unlimited)
    #[arg(long)]
    max_connections: Option<usize>,

    /// Shutdown policy (drain, force)
    #[arg(long)]
    shutdown: Option<ShutdownPolicy>,

    /// Print a default config file and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(max) = self.max_connections {
            config.registry.max_connections = max;
        }
        if let Some(policy) = self.shutdown {
            config.server.shutdown = policy;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load_default().context("loading default config")?,
    };
    cli.apply(&mut config);

    wsrelay::logging::init(&config.logging).context("initializing logging")?;

    tracing::info!("Starting wsrelay v{}", env!("CARGO_PKG_VERSION"));

    let server = RelayServer::standard(
        config.server_config(),
        config.registry_config(),
        config.relay.clone(),
    );

    tracing::info!(
        addr = %server.config().addr(),
        max_connections = ?server.registry().config().max_connections,
        shutdown = ?server.config().shutdown,
        "Configuration loaded"
    );

    server.serve(shutdown_signal()).await?;

    let stats = server.registry().stats().await;
    tracing::info!(
        total_clients = stats.total_registered,
        delivered = stats.messages_delivered,
        failures = stats.delivery_failures,
        "wsrelay stopped"
    );

    Ok(())
}

//! Relay Server
//!
//! The accept loop. Every accepted TCP connection gets its own worker task
//! which performs the handshake, registers the client and runs its reader
//! and writer.
//!
//! # Example
//!
//! ```rust,no_run
//! use wsrelay::dispatch::RelayConfig;
//! use wsrelay::registry::RegistryConfig;
//! use wsrelay::server::{shutdown_signal, RelayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RelayServer::standard(
//!         ServerConfig::default(),
//!         RegistryConfig::default(),
//!         RelayConfig::default(),
//!     );
//!     server.serve(shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```

mod error;
mod worker;

pub use error::{ServerError, ServerResult};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use crate::dispatch::{Event, EventDispatcher, RelayConfig, RelayPolicy};
use crate::registry::{ConnectionRegistry, RegistryConfig};
use worker::WorkerContext;

/// What to do with open connections when the server stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Let clients finish, force-closing whoever is left after `drain_timeout`
    Drain,
    /// Close every registered connection immediately
    #[serde(alias = "force")]
    ForceClose,
}

impl std::str::FromStr for ShutdownPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drain" => Ok(ShutdownPolicy::Drain),
            "force" | "force_close" | "force-close" => Ok(ShutdownPolicy::ForceClose),
            other => Err(format!("unknown shutdown policy: {}", other)),
        }
    }
}

/// Runtime settings for the accept loop and connection workers
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Time allowed for the client to send its request head
    pub handshake_timeout: Duration,
    /// Maximum size of the request head in bytes
    pub max_request_bytes: usize,
    /// Close a connection after this long without any inbound frame
    pub idle_timeout: Option<Duration>,
    /// Interval between keepalive pings
    pub ping_interval: Option<Duration>,
    pub shutdown: ShutdownPolicy,
    /// Upper bound on how long shutdown waits for connections
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            handshake_timeout: Duration::from_secs(10),
            max_request_bytes: 8 * 1024,
            idle_timeout: Some(Duration::from_secs(90)),
            ping_interval: Some(Duration::from_secs(30)),
            shutdown: ShutdownPolicy::Drain,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The WebSocket relay server
pub struct RelayServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<EventDispatcher>,
}

impl RelayServer {
    pub fn new(
        config: ServerConfig,
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            dispatcher,
        }
    }

    /// A server wired with a fresh registry and the [`RelayPolicy`] handler
    pub fn standard(config: ServerConfig, registry: RegistryConfig, relay: RelayConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(registry));
        let policy = RelayPolicy::new(Arc::clone(&registry), relay);
        let dispatcher = EventDispatcher::new().with_handler(Arc::new(policy));
        Self::new(config, registry, Arc::new(dispatcher))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Bind the listening socket
    pub async fn bind(&self) -> ServerResult<TcpListener> {
        let addr = self.config.addr();
        TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Bind and run until `shutdown` resolves
    pub async fn serve<F>(&self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind().await?;
        self.run(listener, shutdown).await
    }

    /// Accept connections on `listener` until `shutdown` resolves
    pub async fn run<F>(&self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        let local: Option<SocketAddr> = listener.local_addr().ok();
        tracing::info!(addr = ?local, "wsrelay listening");

        let shutting_down = Arc::new(AtomicBool::new(false));
        let ctx = WorkerContext {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            dispatcher: Arc::clone(&self.dispatcher),
            shutting_down: Arc::clone(&shutting_down),
        };

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "Accepted connection");
                        connections.spawn(worker::handle_connection(stream, peer, ctx.clone()));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Connection task failed");
                    }
                }
            }
        }

        shutting_down.store(true, Ordering::Release);
        drop(listener);
        tracing::info!(open = connections.len(), policy = ?self.config.shutdown, "Shutting down");

        self.wind_down(connections).await;

        tracing::info!("wsrelay shut down gracefully");
        Ok(())
    }

    async fn wind_down(&self, mut connections: JoinSet<()>) {
        if self.config.shutdown == ShutdownPolicy::Drain {
            let drained =
                tokio::time::timeout(self.config.drain_timeout, join_all(&mut connections))
                    .await
                    .is_ok();
            if drained {
                return;
            }
            tracing::warn!(
                remaining = connections.len(),
                "Drain timeout elapsed, closing remaining connections"
            );
        }

        self.registry.close_all().await;

        if tokio::time::timeout(self.config.drain_timeout, join_all(&mut connections))
            .await
            .is_err()
        {
            tracing::warn!(remaining = connections.len(), "Aborting connection tasks");
            connections.shutdown().await;
            self.release_orphans().await;
        }
    }

    /// Unregister clients whose worker was aborted before it could clean up
    async fn release_orphans(&self) {
        for id in self.registry.ids().await {
            if self.registry.unregister(id).await {
                tracing::debug!(client_id = %id, "Released client left by an aborted worker");
                self.dispatcher.dispatch(&Event::Disconnected(id)).await;
            }
        }
    }
}

async fn join_all(connections: &mut JoinSet<()>) {
    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Connection task failed");
        }
    }
}

/// Wait for shutdown signal
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

//! # wsrelay
//!
//! A WebSocket relay server: accepts WebSocket clients over TCP, tracks
//! them in a shared registry, and relays text messages according to a
//! pluggable policy (echo to the sender, announce new arrivals).
//!
//! ## Modules
//!
//! - [`handshake`]: HTTP upgrade request parsing and accept-key derivation
//! - [`registry`]: live client set, broadcast and unicast delivery
//! - [`dispatch`]: connection lifecycle events and their handlers
//! - [`server`]: accept loop, per-connection workers, shutdown
//! - [`config`]: TOML configuration with environment overrides
//! - [`logging`]: `tracing` subscriber setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wsrelay::{RegistryConfig, RelayConfig, RelayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RelayServer::standard(
//!         ServerConfig::new("127.0.0.1", 8080),
//!         RegistryConfig::default(),
//!         RelayConfig::default(),
//!     );
//!
//!     // Runs until Ctrl+C
//!     server.serve(wsrelay::shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod handshake;
pub mod logging;
pub mod registry;
pub mod server;

// Re-export top-level types for convenience
pub use handshake::{
    derive_accept_key, validate, HandshakeError, HandshakeRequest, HandshakeResponse,
    RejectReason,
};

pub use registry::{
    ClientConnection, ClientId, ConnectionRegistry, ConnectionStatus, DeliveryFailure,
    DeliveryReport, Message, RegistryConfig, RegistryError, RegistryStats,
};

pub use dispatch::{
    DispatchOutcome, Event, EventDispatcher, EventHandler, EventKind, HandlerError,
    HandlerFault, RelayConfig, RelayPolicy,
};

pub use server::{
    shutdown_signal, RelayServer, ServerConfig, ServerError, ServerResult, ShutdownPolicy,
};

pub use config::{Config, ConfigError, LoggingConfig};

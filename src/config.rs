//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatch::RelayConfig;
use crate::registry::RegistryConfig;
use crate::server::{ServerConfig, ShutdownPolicy};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub registry: RegistrySection,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,

    /// 0 disables the idle timeout
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// 0 disables keepalive pings
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    #[serde(default = "default_shutdown")]
    pub shutdown: ShutdownPolicy,

    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_max_request_bytes() -> usize {
    8 * 1024 // 8 KB
}

fn default_idle_timeout() -> u64 {
    90
}

fn default_ping_interval() -> u64 {
    30
}

fn default_shutdown() -> ShutdownPolicy {
    ShutdownPolicy::Drain
}

fn default_drain_timeout() -> u64 {
    10
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            handshake_timeout_secs: default_handshake_timeout(),
            max_request_bytes: default_max_request_bytes(),
            idle_timeout_secs: default_idle_timeout(),
            ping_interval_secs: default_ping_interval(),
            shutdown: default_shutdown(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

/// Connection registry settings
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySection {
    /// 0 means no limit
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

fn default_max_connections() -> usize {
    1000
}

fn default_outbound_capacity() -> usize {
    256
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

fn secs_or_none(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    ///
    /// The first existing file wins. A file that exists but cannot be read
    /// or parsed is an error rather than silently skipped.
    pub fn load_default() -> Result<Self, ConfigError> {
        // Try default config locations
        let config_paths: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("wsrelay").join("config.toml")),
            Some(PathBuf::from("/etc/wsrelay/config.toml")),
            Some(PathBuf::from("./wsrelay.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        match Self::load_first(&config_paths)? {
            Some(config) => Ok(config),
            // Fall back to environment-only config
            None => Ok(Self::from_env()),
        }
    }

    fn load_first(paths: &[PathBuf]) -> Result<Option<Self>, ConfigError> {
        for path in paths {
            if path.exists() {
                return Self::load_with_env(path).map(Some);
            }
        }
        Ok(None)
    }

    /// Apply environment variable overrides to an existing config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(host) = var("WSRELAY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("WSRELAY_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        // Registry overrides
        if let Some(max) = var("WSRELAY_MAX_CONNECTIONS") {
            if let Ok(m) = max.parse() {
                self.registry.max_connections = m;
            }
        }

        // Logging overrides
        if let Some(level) = var("WSRELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("WSRELAY_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Runtime server settings
    pub fn server_config(&self) -> ServerConfig {
        let s = &self.server;
        ServerConfig {
            host: s.host.clone(),
            port: s.port,
            handshake_timeout: Duration::from_secs(s.handshake_timeout_secs.max(1)),
            max_request_bytes: s.max_request_bytes,
            idle_timeout: secs_or_none(s.idle_timeout_secs),
            ping_interval: secs_or_none(s.ping_interval_secs),
            shutdown: s.shutdown,
            drain_timeout: Duration::from_secs(s.drain_timeout_secs),
        }
    }

    /// Runtime registry settings
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_connections: (self.registry.max_connections > 0)
                .then_some(self.registry.max_connections),
            outbound_capacity: self.registry.outbound_capacity.max(1),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# wsrelay Configuration
#
# Environment variables override these settings:
# - WSRELAY_HOST
# - WSRELAY_PORT
# - WSRELAY_MAX_CONNECTIONS
# - WSRELAY_LOG_LEVEL
# - WSRELAY_LOG_FORMAT

[server]
# Address to listen on (use 0.0.0.0 for all interfaces)
host = "127.0.0.1"
port = 8080

# Seconds a client has to send its upgrade request
handshake_timeout_secs = 10

# Largest accepted upgrade request head (bytes)
max_request_bytes = 8192

# Close connections silent for this long (0 = never)
idle_timeout_secs = 90

# Keepalive ping interval (0 = disabled)
ping_interval_secs = 30

# On shutdown: "drain" waits for clients, "force_close" closes them at once
shutdown = "drain"

# Longest time shutdown waits for connections (seconds)
drain_timeout_secs = 10

[registry]
# Maximum concurrent clients (0 = unlimited)
max_connections = 1000

# Messages buffered per client before it counts as too slow
outbound_capacity = 256

[relay]
# Tell existing clients when someone joins
announce_join = true
join_message = "Hey all, a new client has joined us"

# Prepended to every echoed message
echo_prefix = ""

# Forward each message to every other client as well
broadcast_messages = false

# Tell remaining clients when someone leaves ({id} is the client id)
announce_leave = false
leave_message = "Client {id} has left"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty, compact, or json
format = "pretty"

# Optional log file path
# file = "/var/log/wsrelay/wsrelay.log"
"#
    .to_string()
}

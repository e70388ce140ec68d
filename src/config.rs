//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `TRACKGW_API_KEY`, `TRACKGW_LISTEN`,
//!    `TRACKGW_GATEWAY_LISTEN`
//! 2. **Config file** — path via `--config <path>`, or `trackgw.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]                 # admin HTTP API
//! listen = "0.0.0.0:8080"
//! max_connections = 64
//!
//! [gateway]                # device TCP listener
//! listen = "0.0.0.0:6808"
//! protocol_tag = "3G"
//! max_buffer_bytes = 65536
//! idle_timeout_secs = 600  # 0 disables
//! outbound_queue = 32
//!
//! [auth]
//! api_key = "your-secret-key"
//!
//! [traffic]
//! max_entries = 1000       # 0 disables the traffic journal
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;

use serde::Deserialize;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub traffic: TrafficConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Admin HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8080`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrently served admin requests (default 64).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Device-facing TCP listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Socket address devices connect to (default `0.0.0.0:6808`).
    #[serde(default = "default_gateway_listen")]
    pub listen: String,
    /// Tag used on operator frames before a device has spoken (default `3G`).
    #[serde(default = "default_protocol_tag")]
    pub protocol_tag: String,
    /// Pending bytes allowed without a complete frame before the connection
    /// is dropped (default 64 KiB).
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
    /// Close connections silent for this many seconds (default 600, 0 = never).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Outbound frames queued per connection (default 32).
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Pre-shared Bearer token. Override with `TRACKGW_API_KEY` env var.
    /// Defaults to `"change-me"` which triggers a startup warning.
    #[serde(default = "default_api_key")]
    pub api_key: String,
}

/// Traffic journal settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TrafficConfig {
    /// Frames kept in memory (default 1000).
    #[serde(default = "default_traffic_entries")]
    pub max_entries: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_max_connections() -> usize {
    64
}
fn default_gateway_listen() -> String {
    "0.0.0.0:6808".to_string()
}
fn default_protocol_tag() -> String {
    "3G".to_string()
}
fn default_max_buffer_bytes() -> usize {
    64 * 1024
}
fn default_idle_timeout_secs() -> u64 {
    600
}
fn default_outbound_queue() -> usize {
    32
}
fn default_api_key() -> String {
    "change-me".to_string()
}
fn default_traffic_entries() -> usize {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_gateway_listen(),
            protocol_tag: default_protocol_tag(),
            max_buffer_bytes: default_max_buffer_bytes(),
            idle_timeout_secs: default_idle_timeout_secs(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
        }
    }
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            max_entries: default_traffic_entries(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file. Otherwise looks for
    /// `trackgw.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        let mut config = if let Some(p) = path {
            Self::from_file(p)?
        } else if Path::new("trackgw.toml").exists() {
            Self::from_file("trackgw.toml")?
        } else {
            Config::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {path}: {e}"))?;
        toml::from_str(&content).map_err(|e| format!("Failed to parse config file {path}: {e}"))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("TRACKGW_API_KEY") {
            self.auth.api_key = key;
        }
        if let Some(listen) = var("TRACKGW_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(listen) = var("TRACKGW_GATEWAY_LISTEN") {
            self.gateway.listen = listen;
        }
    }
}

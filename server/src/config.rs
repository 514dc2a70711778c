use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Campus portal real-time hub
///
/// Only flags that were actually given are serialized, so an absent flag
/// never masks a value from the TOML file or the environment.
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "campus-hub-server", version, about = "Campus portal real-time hub")]
pub struct Cli {
    /// Port to listen on [default: 8080]
    #[arg(long, env = "CAMPUS_HUB_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "CAMPUS_HUB_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./campus-hub.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "CAMPUS_HUB_JSON_LOGS")]
    #[serde(skip_serializing_if = "is_false")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "is_false")]
    pub generate_config: bool,

    /// Data directory for the chat/poll database [default: ./data]
    #[arg(long, env = "CAMPUS_HUB_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Default number of messages returned by the chat history endpoint [default: 50]
    #[arg(long, env = "CAMPUS_HUB_HISTORY_LIMIT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<u32>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub generate_config: bool,
    pub data_dir: String,
    pub history_limit: u32,

    /// Ping/pong keepalive (loaded from [keepalive] section in TOML)
    #[serde(default)]
    pub keepalive: Option<KeepaliveConfig>,
}

/// Server-initiated ping with a pong deadline. Off by default: connections
/// are otherwise evicted only on read or write errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Seconds between pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for the pong before closing (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

impl KeepaliveConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs.max(1))
    }
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./campus-hub.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            history_limit: 50,
            keepalive: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CAMPUS_HUB_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(Cli::parse()).extract()
    }

    fn figment(cli: Cli) -> Figment {
        let config_path = cli.config.clone();
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("CAMPUS_HUB_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Campus Hub Server Configuration
# Place this file at ./campus-hub.toml or specify with --config <path>
# All settings can be overridden via environment variables (CAMPUS_HUB_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database (chat history, poll results)
# data_dir = "./data"

# Messages returned by GET /api/rooms/{room}/chat/history without ?limit (max 100)
# history_limit = 50

# ---- Keepalive ----
# Server pings each connection and closes it if no pong arrives in time.
# Disabled by default; dead connections are still evicted on send failure.
# [keepalive]
# enabled = false
# ping_interval_secs = 30
# pong_timeout_secs = 10
"#
    .to_string()
}

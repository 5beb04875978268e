use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Command-line flags. Only flags that were actually given override the
/// lower layers, so every field is optional here.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "duet-server", version, about = "Presence and message relay server")]
pub struct Cli {
    /// Port to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Enable structured JSON logging
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Directory with the web client; served for unmatched GET paths
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,
}

/// Effective server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub data_dir: String,
    /// Session token lifetime in seconds
    pub token_ttl_secs: u64,
    /// Mark the auth cookie `Secure` (enable behind HTTPS)
    pub cookie_secure: bool,
    /// Allowed browser origin for credentialed CORS requests
    #[serde(default)]
    pub cors_origin: Option<String>,
    #[serde(default)]
    pub static_dir: Option<String>,
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Periodic purge of old chat messages. Disabled unless switched on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Messages older than this are deleted (default: 60)
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,

    /// Seconds between purge runs (default: 60)
    #[serde(default = "default_purge_interval")]
    pub interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_age_secs: default_max_age(),
            interval_secs: default_purge_interval(),
        }
    }
}

fn default_max_age() -> u64 {
    60
}

fn default_purge_interval() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            bind_address: "0.0.0.0".to_string(),
            config: "./duet.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            token_ttl_secs: 3600,
            cookie_secure: false,
            cors_origin: None,
            static_dir: None,
            retention: RetentionConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (DUET_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(Cli::parse()).extract()
    }

    pub fn figment(cli: Cli) -> Figment {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| Config::default().config);

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("DUET_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# duet-server configuration
# Place this file at ./duet.toml or specify with --config <path>
# All settings can be overridden via environment variables (DUET_PORT,
# DUET_RETENTION__ENABLED, ...) or CLI flags (--port, ...)

# Server port (default: 4000)
# port = 4000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging
# json_logs = false

# Data directory for the SQLite database and the token signing key
# data_dir = "./data"

# Session token lifetime in seconds (default: 3600)
# token_ttl_secs = 3600

# Set the Secure flag on the auth cookie (enable when served over HTTPS)
# cookie_secure = false

# Browser origin allowed to make credentialed requests (CORS). Unset = no CORS.
# cors_origin = "https://chat.example.com"

# Directory with the web client, served for unmatched GET paths
# static_dir = "./public"

# ---- Message retention ----
# Old chat messages are purged only when this is enabled.
# [retention]
# enabled = false
# max_age_secs = 60     # delete messages older than this
# interval_secs = 60    # how often the purge runs
"#
    .to_string()
}

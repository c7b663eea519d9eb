use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::state::UploadRateLimit;
use crate::storage::RetryPolicy;

// Only flags given on the command line are serialized, so an omitted flag
// never shadows the TOML file or the environment.

/// Provenance vault server
#[derive(Parser, Serialize, Clone, Debug)]
#[command(
    name = "provenance-server",
    version,
    about = "Encrypted provenance record store"
)]
pub struct CliArgs {
    /// Port to listen on [default: 3000]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./provenance.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (SQLite index, object bodies) [default: ./data]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

/// Effective server configuration after all layers are merged.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,

    pub bind_address: String,

    /// TOML file the configuration was read from
    pub config: String,

    pub json_logs: bool,

    pub generate_config: bool,

    pub data_dir: String,

    /// Object store configuration (loaded from [storage] section in TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    /// Retry policy for transient store failures (loaded from [retry] section in TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,

    /// Upload limits (loaded from [limits] section in TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<LimitsConfig>,
}

/// Which object store implementation backs the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Files under `data_dir` with a SQLite index
    #[default]
    Local,
    /// In-process only; everything is lost on restart
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Store implementation (default: local)
    #[serde(default)]
    pub backend: StorageBackend,

    /// Directory under `data_dir` holding object bodies (default: "provenance")
    #[serde(default = "default_container")]
    pub container: String,

    /// Number of paths fetched per page when listing (default: 100)
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            container: default_container(),
            list_page_size: default_list_page_size(),
        }
    }
}

fn default_container() -> String {
    "provenance".to_string()
}

fn default_list_page_size() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per store call, first try included (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Delay before the first retry, doubled on each further attempt (default: 100)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on a single delay, 0 = unbounded (default: 2000)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Random spread applied to each delay, as a fraction (default: 0.2)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.max_attempts, Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter(self.jitter)
    }
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2000
}

fn default_jitter() -> f64 {
    0.2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum request body size in megabytes (default: 100)
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_mb: u32,

    /// Per-IP uploads allowed per minute; unset disables throttling
    #[serde(default)]
    pub uploads_per_minute: Option<u32>,

    /// Uploads allowed in a burst (default: 10)
    #[serde(default = "default_upload_burst")]
    pub upload_burst: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_size_mb: default_max_upload_size(),
            uploads_per_minute: None,
            upload_burst: default_upload_burst(),
        }
    }
}

impl LimitsConfig {
    pub fn upload_rate_limit(&self) -> Option<UploadRateLimit> {
        self.uploads_per_minute.map(|per_minute| UploadRateLimit {
            per_minute,
            burst: self.upload_burst,
        })
    }
}

fn default_max_upload_size() -> u32 {
    100
}

fn default_upload_burst() -> u32 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_address: "0.0.0.0".to_string(),
            config: "./provenance.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            storage: None,
            retry: None,
            limits: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PROVENANCE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = CliArgs::parse();
        Self::figment(&cli).extract()
    }

    fn figment(cli: &CliArgs) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("PROVENANCE_"))
            .merge(Serialized::defaults(cli))
    }

    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    pub fn retry(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    pub fn limits(&self) -> LimitsConfig {
        self.limits.clone().unwrap_or_default()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Provenance Vault Server Configuration
# Place this file at ./provenance.toml or specify with --config <path>
# All settings can be overridden via environment variables (PROVENANCE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 3000)
# port = 3000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite index and encrypted object bodies
# data_dir = "./data"

# ---- Object Store ----
# [storage]

# Backend: "local" (files + SQLite index) or "memory" (lost on restart)
# backend = "local"

# Directory under data_dir holding object bodies
# container = "provenance"

# Paths fetched per page while listing a namespace
# list_page_size = 100

# ---- Retry (transient store failures) ----
# [retry]
# max_attempts = 3       # first try included
# base_delay_ms = 100    # doubled on each further attempt
# max_delay_ms = 2000    # 0 = no cap
# jitter = 0.2           # +/- 20% random spread

# ---- Limits ----
# [limits]

# Maximum request body size in megabytes (default: 100)
# max_upload_size_mb = 100

# Per-IP upload throttling (unset = disabled)
# uploads_per_minute = 60
# upload_burst = 10
"#
    .to_string()
}

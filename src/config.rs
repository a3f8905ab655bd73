use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default, alias = "github")]
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            authority: AuthorityConfig::default(),
            auth: AuthConfig::default(),
            server: ServerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Authority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorityConfig {
    /// Full URL to the forge API root (e.g. `https://ghe.corp.example.com/api/v3`).
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Per-request timeout in seconds for authority calls.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Below this many remaining API calls, authority lookups fail fast
    /// instead of spending the last of the budget.
    #[serde(default = "default_rate_limit_buffer")]
    pub rate_limit_buffer: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
            rate_limit_buffer: default_rate_limit_buffer(),
            user_agent: default_user_agent(),
        }
    }
}

impl AuthorityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_rate_limit_buffer() -> u32 {
    50
}

fn default_user_agent() -> String {
    concat!("forgeauth/", env!("CARGO_PKG_VERSION")).to_string()
}

// ---------------------------------------------------------------------------
// Auth cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Lifetime of a cached write decision in seconds.
    #[serde(default = "default_expiration_secs")]
    pub expiration_secs: u64,
    /// Surface a rejected never-seen credential as an authentication error
    /// rather than a plain denial.
    #[serde(default = "bool_true")]
    pub propagate_invalid_credential: bool,
    /// Name of the environment variable that holds the webhook secret.
    #[serde(default = "default_webhook_secret_env")]
    pub webhook_secret_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            expiration_secs: default_expiration_secs(),
            propagate_invalid_credential: true,
            webhook_secret_env: default_webhook_secret_env(),
        }
    }
}

impl AuthConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }
}

fn default_expiration_secs() -> u64 {
    900
}

fn bool_true() -> bool {
    true
}

fn default_webhook_secret_env() -> String {
    "FORGEAUTH_WEBHOOK_SECRET".to_string()
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:8080`).
    #[serde(default = "default_http_listen")]
    pub http_listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_listen: default_http_listen(),
        }
    }
}

fn default_http_listen() -> String {
    "0.0.0.0:8080".to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(config.auth.expiration_secs > 0, "expiration_secs must be positive");
    anyhow::ensure!(config.authority.timeout_secs > 0, "timeout_secs must be positive");
    anyhow::ensure!(
        config.authority.api_url.starts_with("http://")
            || config.authority.api_url.starts_with("https://"),
        "api_url must be an http(s) URL"
    );
    config
        .server
        .http_listen
        .parse::<SocketAddr>()
        .context("invalid http_listen address")?;
    Ok(())
}

//! Configuration types and loading logic.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::dispatch::egress::SelectionStrategy;

/// Top-level relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub proxies: ProxiesConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

/// Static API-key gate configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub api_key: String,
}

/// Upstream target and dispatch policy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base host; the inbound domain label becomes its subdomain.
    #[serde(default = "default_upstream_host")]
    pub host: String,

    /// Per-attempt timeout for outbound calls.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total outbound attempts per inbound request (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts. Deliberately small: the point is to
    /// reach a different egress quickly, not to back off.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Inbound body size cap.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Egress proxy pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxiesConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_strategy")]
    pub strategy: SelectionStrategy,

    /// Proxy endpoints as `host:port` strings, in rotation order.
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Credentials shared by every proxy endpoint.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: default_upstream_host(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for ProxiesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: default_strategy(),
            endpoints: Vec::new(),
            username: String::new(),
            password: String::new(),
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0:5050".to_string()
}

fn default_upstream_host() -> String {
    "roblox.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    250
}

fn default_max_body_bytes() -> usize {
    256 * 1024 * 1024
}

fn default_strategy() -> SelectionStrategy {
    SelectionStrategy::DirectFirst
}

impl RelayConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (RELAY_ prefix, __ for nesting)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let mut config: RelayConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("RELAY_").split("__"))
            .extract()?;

        // Direct env var override for the secret
        if let Ok(key) = std::env::var("RELAY_API_KEY") {
            config.auth.api_key = key;
        }

        Ok(config)
    }
}

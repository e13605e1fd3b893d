//! Configuration — YAML file with per-network credentials and limits.
//!
//! Loaded once at start-up from `$CHAINPROBE_CONFIG` or
//! `~/.chainprobe/config.yaml`. Also acts as the credential provider for
//! the dispatcher: placeholder keys copied from the template are dropped
//! before they can reach a key selector.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapters::HttpSettings;
use crate::pool::rate_tracker::RateLimit;
use crate::pool::{registry, Credential};

/// Prefixes that mark a template value nobody filled in.
const PLACEHOLDER_PREFIXES: &[&str] = &["YOUR_", "<"];

const DISCORD_WEBHOOK_PREFIX: &str = "https://discord.com/api/webhooks/";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown network '{0}' (supported: {1})")]
    UnknownNetwork(String, String),
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
    #[error("Discord webhook URL must start with {}", DISCORD_WEBHOOK_PREFIX)]
    BadWebhook,
}

/// Source of API keys for a network, in rotation order.
pub trait CredentialProvider: Send + Sync {
    fn credentials_for(&self, network: &str) -> Vec<Credential>;
}

// ── File Format ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_time_window")]
    pub time_window_secs: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            time_window_secs: default_time_window(),
        }
    }
}

impl RateLimitConfig {
    pub fn to_limit(&self) -> RateLimit {
        RateLimit {
            max_requests: self.max_requests,
            time_window: Duration::from_secs_f64(self.time_window_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub webhook_url: String,
    /// Send a batch summary every N completed batches
    #[serde(default = "default_notification_interval")]
    pub notification_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Networks to check, in registry spelling
    #[serde(default = "default_networks")]
    pub networks: Vec<String>,
    /// API keys per network, in rotation order
    #[serde(default)]
    pub api_keys: BTreeMap<String, Vec<String>>,
    /// Default per-key budget
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Per-network overrides of `rate_limit`
    #[serde(default)]
    pub rate_limits: BTreeMap<String, RateLimitConfig>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// Longest wait for one "wallet found" notification
    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_secs: u64,
    /// Log a progress snapshot every N completed probes
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
    /// Where found-wallet reports go (relative to the data dir)
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub discord: Option<DiscordConfig>,
}

fn default_networks() -> Vec<String> {
    registry::supported_ids().into_iter().map(String::from).collect()
}

fn default_max_requests() -> u32 {
    5
}

fn default_time_window() -> f64 {
    1.0
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_connections() -> usize {
    100
}

fn default_retry_backoff() -> u64 {
    500
}

fn default_notify_timeout() -> u64 {
    10
}

fn default_progress_every() -> usize {
    10
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("found_wallets")
}

fn default_notification_interval() -> u64 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            networks: default_networks(),
            api_keys: BTreeMap::new(),
            rate_limit: RateLimitConfig::default(),
            rate_limits: BTreeMap::new(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_connections: default_max_connections(),
            retry_backoff_ms: default_retry_backoff(),
            notify_timeout_secs: default_notify_timeout(),
            progress_every: default_progress_every(),
            output_dir: default_output_dir(),
            discord: None,
        }
    }
}

impl Config {
    /// Load and validate a YAML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for network in &self.networks {
            if registry::get_network(network).is_none() {
                return Err(ConfigError::UnknownNetwork(
                    network.clone(),
                    registry::supported_ids().join(", "),
                ));
            }
        }
        let limits = std::iter::once(&self.rate_limit).chain(self.rate_limits.values());
        for limit in limits {
            if limit.max_requests == 0 {
                return Err(ConfigError::NotPositive("max_requests"));
            }
            if !(limit.time_window_secs > 0.0 && limit.time_window_secs.is_finite()) {
                return Err(ConfigError::NotPositive("time_window_secs"));
            }
        }
        if self.progress_every == 0 {
            return Err(ConfigError::NotPositive("progress_every"));
        }
        if self.notify_timeout_secs == 0 {
            return Err(ConfigError::NotPositive("notify_timeout_secs"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::NotPositive("max_connections"));
        }
        if let Some(discord) = &self.discord {
            if !discord.webhook_url.starts_with(DISCORD_WEBHOOK_PREFIX) {
                return Err(ConfigError::BadWebhook);
            }
            if discord.notification_interval == 0 {
                return Err(ConfigError::NotPositive("notification_interval"));
            }
        }
        Ok(())
    }

    /// Per-key budget for a network, honoring overrides.
    pub fn rate_limit_for(&self, network: &str) -> RateLimit {
        self.rate_limits
            .get(network)
            .unwrap_or(&self.rate_limit)
            .to_limit()
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_connections: self.max_connections,
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    /// Resolve `output_dir` against the data directory.
    pub fn output_dir_in(&self, data_dir: &Path) -> PathBuf {
        if self.output_dir.is_absolute() {
            self.output_dir.clone()
        } else {
            data_dir.join(&self.output_dir)
        }
    }

    pub fn is_selected(&self, network: &str) -> bool {
        self.networks.iter().any(|n| n == network)
    }

    /// Whether a batch should keep `network` for dispatch. Only supported
    /// networks left out of `networks` are dropped; unknown ones stay so
    /// the run can report them as skipped.
    pub fn should_dispatch(&self, network: &str) -> bool {
        registry::get_network(network).is_none() || self.is_selected(network)
    }
}

impl CredentialProvider for Config {
    fn credentials_for(&self, network: &str) -> Vec<Credential> {
        self.api_keys
            .get(network)
            .map(|keys| {
                keys.iter()
                    .map(|k| k.trim())
                    .filter(|k| !is_placeholder(k))
                    .map(Credential::new)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Empty keys and untouched template values are not real credentials.
pub fn is_placeholder(key: &str) -> bool {
    let key = key.trim();
    key.is_empty() || PLACEHOLDER_PREFIXES.iter().any(|p| key.starts_with(p))
}

// ── Locations ───────────────────────────────────────────────────────

/// Where the daemon keeps its files.
#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
}

impl Paths {
    pub fn from_env() -> Result<Self> {
        let home = dirs::home_dir().context("Cannot determine home directory")?;
        let data_dir = home.join(".chainprobe");
        let config_path = std::env::var_os("CHAINPROBE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("config.yaml"));
        Ok(Self { data_dir, config_path })
    }
}

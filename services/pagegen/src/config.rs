//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Secrets never live in the TOML: API keys come from GENAI_API_KEYS (or
//! indexed GENAI_API_KEY_1..) plus the optional GENAI_PRIORITY_KEY, and the
//! CMS token from CMS_TOKEN.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use genai_pool::{LimiterConfig, RetryPolicy};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub cms: CmsConfig,
    pub products: ProductsConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

/// Listener settings. The admin API gets its own port so it can stay
/// unexposed while the app port is published.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Generative AI provider settings.
#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Per-key throughput ceilings. Defaults match `LimiterConfig::default()`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub min_interval_ms: u64,
    pub max_per_minute: u32,
    pub max_per_hour: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limiter = LimiterConfig::default();
        Self {
            min_interval_ms: limiter.min_interval.as_millis() as u64,
            max_per_minute: limiter.max_per_minute,
            max_per_hour: limiter.max_per_hour,
        }
    }
}

impl LimitsConfig {
    pub fn to_limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            min_interval: Duration::from_millis(self.min_interval_ms),
            max_per_minute: self.max_per_minute,
            max_per_hour: self.max_per_hour,
            ..LimiterConfig::default()
        }
    }
}

/// Retry policy knobs. The quota threshold is configuration because the
/// provider's retry-delay semantics carry no documented guarantee.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub max_key_retries: u32,
    pub quota_threshold_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            max_key_retries: policy.max_key_retries,
            quota_threshold_secs: policy.quota_threshold_secs,
        }
    }
}

impl RetryConfig {
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            max_key_retries: self.max_key_retries,
            quota_threshold_secs: self.quota_threshold_secs,
            ..RetryPolicy::default()
        }
    }
}

/// Content-management system (page publishing target).
#[derive(Debug, Deserialize)]
pub struct CmsConfig {
    pub base_url: String,
    /// Loaded from the CMS_TOKEN env var, never the TOML.
    #[serde(skip)]
    pub token: Option<Secret<String>>,
}

/// Commerce backend for related products.
#[derive(Debug, Deserialize)]
pub struct ProductsConfig {
    pub base_url: String,
    #[serde(default = "default_product_limit")]
    pub limit: usize,
}

/// History log settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub path: PathBuf,
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("pagegen-history.json"),
            capacity: 100,
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    100
}

fn default_product_limit() -> usize {
    6
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment
    /// variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        for (field, url) in [
            ("provider.base_url", &config.provider.base_url),
            ("cms.base_url", &config.cms.base_url),
            ("products.base_url", &config.products.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{field} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if config.provider.timeout_secs == 0 {
            return Err(common::Error::Config(
                "provider.timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "server.max_connections must be greater than 0".into(),
            ));
        }

        if config.history.capacity == 0 {
            return Err(common::Error::Config(
                "history.capacity must be greater than 0".into(),
            ));
        }

        if config.retry.max_attempts == 0 {
            return Err(common::Error::Config(
                "retry.max_attempts must be greater than 0".into(),
            ));
        }

        if let Ok(token) = std::env::var("CMS_TOKEN")
            && !token.trim().is_empty()
        {
            config.cms.token = Some(Secret::new(token.trim().to_owned()));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("pagegen.toml")
    }
}

/// Read the raw key list and optional priority key from the environment.
///
/// `GENAI_API_KEYS` (comma-separated) wins; otherwise indexed
/// `GENAI_API_KEY_1`, `GENAI_API_KEY_2`, … are collected until the first
/// gap. Deduplication and format validation happen in the pool.
pub fn keys_from_env() -> common::Result<(Vec<String>, Option<String>)> {
    let mut keys: Vec<String> = Vec::new();

    if let Ok(joined) = std::env::var("GENAI_API_KEYS") {
        keys.extend(
            joined
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
        );
    } else {
        for i in 1.. {
            match std::env::var(format!("GENAI_API_KEY_{i}")) {
                Ok(key) if !key.trim().is_empty() => keys.push(key.trim().to_owned()),
                _ => break,
            }
        }
    }

    if keys.is_empty() {
        return Err(common::Error::Env(
            "no API keys configured: set GENAI_API_KEYS or GENAI_API_KEY_1..".into(),
        ));
    }

    let priority = std::env::var("GENAI_PRIORITY_KEY")
        .ok()
        .map(|k| k.trim().to_owned())
        .filter(|k| !k.is_empty());

    Ok((keys, priority))
}

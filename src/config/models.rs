use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
pub struct AppConfig {
    #[garde(dive)]
    #[serde(default)]
    pub server: ServerConfig,

    #[garde(dive)]
    #[serde(default)]
    pub logging: LoggingConfig,

    #[garde(dive)]
    #[serde(default)]
    pub cache: CacheSettings,

    #[garde(dive)]
    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[garde(skip)]
    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[garde(range(min = 1024, max = 65535))]
    pub port: u16,

    #[garde(length(min = 1), custom(validate_bind_address))]
    #[serde(default = "default_bind")]
    pub bind: String,

    #[garde(range(min = 1, max = 300))]
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64, // seconds
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 6801,
            bind: "0.0.0.0".to_string(),
            shutdown_timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LoggingConfig {
    #[garde(length(min = 1))]
    #[serde(default = "default_log_level")]
    pub level: String, // trace, debug, info, warn, error

    #[garde(pattern(r"^(json|pretty)$"))]
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Which backend holds cached grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    #[default]
    Memory,
    Remote,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CacheSettings {
    #[garde(skip)]
    #[serde(default)]
    pub kind: CacheKind,

    /// Seconds a cached access (memory) or hash key (remote) stays alive without activity.
    #[garde(range(min = 1, max = 86400))]
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    #[garde(dive)]
    #[serde(default)]
    pub remote: RemoteStoreConfig,
}

fn default_ttl_seconds() -> u64 {
    10
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            kind: CacheKind::Memory,
            ttl_seconds: default_ttl_seconds(),
            remote: RemoteStoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RemoteStoreConfig {
    #[garde(length(min = 1))]
    #[serde(default = "default_remote_host")]
    pub host: String,

    #[garde(range(min = 1))]
    #[serde(default = "default_remote_port")]
    pub port: u16,

    /// Prefix prepended to every hash key, e.g. `iamcache:access:{id}:role`.
    #[garde(length(min = 1))]
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[garde(range(min = 10, max = 60000))]
    #[serde(default = "default_remote_timeout")]
    pub timeout_ms: u64,

    #[garde(range(min = 1, max = 256))]
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_remote_host() -> String {
    "localhost".to_string()
}

fn default_remote_port() -> u16 {
    6379
}

fn default_namespace() -> String {
    "iamcache:".to_string()
}

fn default_remote_timeout() -> u64 {
    500
}

fn default_pool_size() -> usize {
    16
}

impl RemoteStoreConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            host: default_remote_host(),
            port: default_remote_port(),
            namespace: default_namespace(),
            timeout_ms: default_remote_timeout(),
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UpstreamConfig {
    #[garde(custom(validate_gateway_url))]
    #[serde(default = "default_gateway")]
    pub gateway: String,

    #[garde(skip)]
    #[serde(default)]
    pub key: String,

    #[garde(range(min = 100, max = 60000))]
    #[serde(default = "default_upstream_timeout")]
    pub timeout_ms: u64,

    /// Event gateway streaming provider invalidations. Without it only the `/events` webhook feeds the cache.
    #[garde(custom(validate_events_url))]
    #[serde(default)]
    pub events: Option<String>,

    /// Delay before reconnecting to the event gateway after the stream drops.
    #[garde(range(min = 100, max = 300000))]
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_ms: u64,
}

fn default_gateway() -> String {
    "https://api.unloq.io".to_string()
}

fn default_upstream_timeout() -> u64 {
    3000
}

fn default_reconnect_ms() -> u64 {
    2000
}

impl UpstreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            gateway: default_gateway(),
            key: String::new(),
            timeout_ms: default_upstream_timeout(),
            events: None,
            reconnect_ms: default_reconnect_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    #[default]
    Production,
}

fn validate_bind_address(value: &str, _: &()) -> garde::Result {
    value
        .parse::<std::net::IpAddr>()
        .map(|_| ())
        .map_err(|_| garde::Error::new("Invalid IP address"))
}

fn validate_gateway_url(value: &str, _: &()) -> garde::Result {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(garde::Error::new("Gateway must be an http(s) URL"))
    }
}

fn validate_events_url(value: &Option<String>, _: &()) -> garde::Result {
    match value {
        Some(url) => validate_gateway_url(url, &()),
        None => Ok(()),
    }
}

//! Monitor configuration.
//!
//! Built in three layers: compiled-in defaults, then an optional YAML file
//! named by `MONITOR_CONFIG`, then individual environment variable overrides.

use crate::error::MonitorError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use watch_hub::HubConfig;

/// Top-level monitor configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// HTTP listener
    pub server: ServerConfig,
    /// Namespace filter and default
    pub namespaces: NamespaceConfig,
    /// Hub queue, restart and heartbeat tuning
    pub hub: HubSettings,
    /// WebSocket timings
    pub transport: TransportConfig,
    /// Log level and output format
    pub logging: LoggingConfig,
}

/// HTTP listener address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind (`BIND_ADDRESS`)
    pub bind_address: IpAddr,
    /// Port to bind (`PORT`)
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
        }
    }
}

/// Which namespaces clients may subscribe to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Namespace used when a client does not name one
    pub default: String,
    /// Allow list; empty allows every namespace not excluded
    pub allowed: Vec<String>,
    /// Namespaces never served, even if allowed
    pub exclude: Vec<String>,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            default: "default".to_string(),
            allowed: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl NamespaceConfig {
    /// Whether clients may watch `namespace`. Exclusions win over the allow list.
    pub fn is_allowed(&self, namespace: &str) -> bool {
        if self.exclude.iter().any(|ns| ns == namespace) {
            return false;
        }
        self.allowed.is_empty() || self.allowed.iter().any(|ns| ns == namespace)
    }
}

/// Hub tuning, in whole seconds where a duration is involved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Per-subscriber outbound queue length
    pub queue_capacity: usize,
    /// First delay before reopening a failed watch
    pub retry_delay_secs: u64,
    /// Upper bound on the reopen delay
    pub retry_max_delay_secs: u64,
    /// Seconds between heartbeat broadcasts
    pub heartbeat_interval_secs: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            retry_delay_secs: 5,
            retry_max_delay_secs: 60,
            heartbeat_interval_secs: 30,
        }
    }
}

impl HubSettings {
    /// Converts to the hub's own configuration type.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_capacity: self.queue_capacity,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            retry_max_delay: Duration::from_secs(self.retry_max_delay_secs),
        }
    }

    /// Heartbeat interval as a `Duration`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// WebSocket connection timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Seconds between server pings
    pub ping_interval_secs: u64,
    /// Seconds of client silence before the connection is dropped
    pub pong_wait_secs: u64,
    /// Seconds allowed for a single frame write
    pub write_timeout_secs: u64,
    /// Largest inbound frame accepted from a client, in bytes
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 54,
            pong_wait_secs: 60,
            write_timeout_secs: 10,
            max_message_size: 512,
        }
    }
}

impl TransportConfig {
    /// Ping interval as a `Duration`.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Read deadline as a `Duration`.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    /// Per-frame write timeout as a `Duration`.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(MonitorError::InvalidConfig(format!(
                "unknown log format '{}' (expected 'text' or 'json')",
                other
            ))),
        }
    }
}

/// Logging setup; `RUST_LOG` overrides `level` when set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (`LOG_LEVEL`)
    pub level: String,
    /// Output format (`LOG_FORMAT`)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl MonitorConfig {
    /// Loads configuration from the process environment.
    pub fn load() -> Result<Self, MonitorError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration using `lookup` to read environment variables.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, MonitorError> {
        let mut config = match lookup("MONITOR_CONFIG").filter(|path| !path.is_empty()) {
            Some(path) => {
                let contents = std::fs::read_to_string(&path)?;
                Self::from_yaml(&contents)?
            }
            None => Self::default(),
        };

        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a YAML document; omitted keys keep their defaults.
    pub fn from_yaml(contents: &str) -> Result<Self, MonitorError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), MonitorError> {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|e| MonitorError::InvalidConfig(format!("PORT is not a valid port: '{}': {}", port, e)))?;
        }
        if let Some(address) = lookup("BIND_ADDRESS") {
            self.server.bind_address = address.trim().parse().map_err(|e| {
                MonitorError::InvalidConfig(format!("BIND_ADDRESS is not an IP address: '{}': {}", address, e))
            })?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        if let Some(namespace) = lookup("DEFAULT_NAMESPACE") {
            self.namespaces.default = namespace.trim().to_string();
        }
        if let Some(allowed) = lookup("ALLOWED_NAMESPACES") {
            self.namespaces.allowed = split_list(&allowed);
        }
        if let Some(excluded) = lookup("EXCLUDED_NAMESPACES") {
            self.namespaces.exclude = split_list(&excluded);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), MonitorError> {
        let invalid = |message: &str| Err(MonitorError::InvalidConfig(message.to_string()));

        if self.namespaces.default.is_empty() {
            return invalid("default namespace must not be empty");
        }
        if !self.namespaces.is_allowed(&self.namespaces.default) {
            return Err(MonitorError::InvalidConfig(format!(
                "default namespace '{}' is excluded by the namespace filter",
                self.namespaces.default
            )));
        }
        if self.hub.queue_capacity == 0 {
            return invalid("hub.queue_capacity must be at least 1");
        }
        if self.hub.retry_delay_secs == 0 {
            return invalid("hub.retry_delay_secs must be at least 1");
        }
        if self.hub.heartbeat_interval_secs == 0 {
            return invalid("hub.heartbeat_interval_secs must be at least 1");
        }
        if self.transport.ping_interval_secs == 0 || self.transport.write_timeout_secs == 0 {
            return invalid("transport intervals must be at least 1 second");
        }
        if self.transport.ping_interval_secs >= self.transport.pong_wait_secs {
            return invalid("transport.ping_interval_secs must be shorter than transport.pong_wait_secs");
        }
        Ok(())
    }

    /// Socket address the HTTP server binds.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.bind_address, self.server.port)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

//! WolfElect Configuration
//!
//! This module provides configuration structures for an election node
//! and the bus it talks through.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main WolfElect configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WolfElectConfig {
    /// Message bus configuration
    #[serde(default)]
    pub bus: BusConfig,

    /// Election timing configuration
    #[serde(default)]
    pub election: ElectionConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which bus implementation a node connects to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// In-process broadcast bus (single process only)
    Memory,
    /// TCP connection to a `wolfelect broker`
    Tcp,
    /// Redis pub/sub
    Redis,
}

/// Message bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus implementation
    #[serde(default = "default_bus_kind")]
    pub kind: BusKind,

    /// Broker address (host:port), required for the tcp bus
    #[serde(default = "default_broker_address")]
    pub broker_address: String,

    /// Redis URL, required for the redis bus
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Redis database index
    #[serde(default)]
    pub db: i64,

    /// Prefix scoping the four election channels
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Election timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Lower bound of the leader check interval, as a multiple of the heartbeat interval
    #[serde(default = "default_leader_check_min_factor")]
    pub leader_check_min_factor: u32,

    /// Upper bound of the leader check interval, as a multiple of the heartbeat interval
    #[serde(default = "default_leader_check_max_factor")]
    pub leader_check_max_factor: u32,

    /// Capacity of the node's event queue
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Longest accepted channel prefix, in bytes
pub const MAX_PREFIX_LEN: usize = 256;

/// Sample configuration written by `wolfelect init`
pub const SAMPLE_CONFIG: &str = r#"# WolfElect Configuration
# Generated configuration file

[bus]
# "tcp" connects to a `wolfelect broker`, "redis" to a Redis server;
# "memory" only reaches nodes in this process
kind = "tcp"
broker_address = "127.0.0.1:7700"
# url = "redis://127.0.0.1:6379"
# db = 0
prefix = "wolfelect"
connect_timeout_ms = 5000

[election]
heartbeat_interval_ms = 500
# Leader checks run every 3 to 6 heartbeat intervals, re-drawn each time
leader_check_min_factor = 3
leader_check_max_factor = 6
event_queue_capacity = 1024

[api]
enabled = true
bind_address = "0.0.0.0:8090"

[logging]
level = "info"
format = "pretty"
"#;

// Default value functions
fn default_bus_kind() -> BusKind {
    BusKind::Tcp
}

fn default_broker_address() -> String {
    "127.0.0.1:7700".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_prefix() -> String {
    "wolfelect".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_heartbeat_interval_ms() -> u64 {
    500
}

fn default_leader_check_min_factor() -> u32 {
    3
}

fn default_leader_check_max_factor() -> u32 {
    6
}

fn default_event_queue_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            kind: default_bus_kind(),
            broker_address: default_broker_address(),
            url: default_redis_url(),
            db: 0,
            prefix: default_prefix(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            leader_check_min_factor: default_leader_check_min_factor(),
            leader_check_max_factor: default_leader_check_max_factor(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ElectionConfig {
    /// Get heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Shortest leader check interval
    pub fn leader_check_min(&self) -> Duration {
        self.heartbeat_interval() * self.leader_check_min_factor
    }

    /// Longest leader check interval
    pub fn leader_check_max(&self) -> Duration {
        self.heartbeat_interval() * self.leader_check_max_factor
    }
}

impl WolfElectConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfElectConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.election.heartbeat_interval_ms == 0 {
            return Err(crate::Error::Config(
                "election.heartbeat_interval_ms must be greater than zero".into(),
            ));
        }

        if self.election.leader_check_min_factor == 0 {
            return Err(crate::Error::Config(
                "election.leader_check_min_factor must be at least 1".into(),
            ));
        }

        if self.election.leader_check_min_factor > self.election.leader_check_max_factor {
            return Err(crate::Error::Config(format!(
                "election.leader_check_min_factor ({}) exceeds leader_check_max_factor ({})",
                self.election.leader_check_min_factor, self.election.leader_check_max_factor
            )));
        }

        if self.election.event_queue_capacity == 0 {
            return Err(crate::Error::Config(
                "election.event_queue_capacity must be greater than zero".into(),
            ));
        }

        if self.bus.prefix.is_empty() || self.bus.prefix.chars().any(char::is_whitespace) {
            return Err(crate::Error::Config(
                "bus.prefix must be non-empty and contain no whitespace".into(),
            ));
        }

        if self.bus.prefix.len() > MAX_PREFIX_LEN {
            return Err(crate::Error::Config(format!(
                "bus.prefix is {} bytes, limit is {}",
                self.bus.prefix.len(),
                MAX_PREFIX_LEN
            )));
        }

        if self.bus.kind == BusKind::Tcp && self.bus.broker_address.is_empty() {
            return Err(crate::Error::Config(
                "bus.broker_address is required for the tcp bus".into(),
            ));
        }

        if self.bus.kind == BusKind::Redis && self.bus.url.is_empty() {
            return Err(crate::Error::Config(
                "bus.url is required for the redis bus".into(),
            ));
        }

        if self.bus.db < 0 {
            return Err(crate::Error::Config(format!(
                "bus.db must not be negative, got {}",
                self.bus.db
            )));
        }

        Ok(())
    }

    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.bus.connect_timeout_ms)
    }

    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        PathBuf::from("wolfelect.toml")
    }
}

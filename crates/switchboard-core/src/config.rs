//! Configuration system for Switchboard
//!
//! Supports TOML configuration files with sensible defaults.
//! Configuration is loaded from:
//! - macOS: ~/Library/Application Support/switchboard/config.toml
//! - Linux: ~/.config/switchboard/config.toml
//! - Windows: %APPDATA%/switchboard/config.toml

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_MAILBOX_CAPACITY, DEFAULT_PORT, DEFAULT_WS_PATH,
    MAX_MESSAGE_SIZE, PING_PERIOD_SECS, PONG_WAIT_SECS, WRITE_WAIT_SECS,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener settings
    pub server: ServerConfig,
    /// Hub (event loop) settings
    pub hub: HubConfig,
    /// Per-connection transport settings
    pub transport: TransportConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind: IpAddr,
    /// Listening port
    pub port: u16,
    /// Path that accepts WebSocket upgrades
    pub ws_path: String,
    /// Directory served for plain GET requests (None = no static files)
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            ws_path: DEFAULT_WS_PATH.to_string(),
            static_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Outbound mailbox capacity per session
    pub mailbox_capacity: usize,
    /// Capacity of the shared event queue feeding the hub
    pub event_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum inbound message size in bytes
    pub max_message_size: usize,
    /// Timeout for writing one frame (seconds)
    pub write_wait_secs: u64,
    /// Read deadline, extended on every pong (seconds)
    pub pong_wait_secs: u64,
    /// Interval between pings (seconds)
    pub ping_period_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            write_wait_secs: WRITE_WAIT_SECS,
            pong_wait_secs: PONG_WAIT_SECS,
            ping_period_secs: PING_PERIOD_SECS,
        }
    }
}

impl TransportConfig {
    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_secs(self.ping_period_secs)
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "switchboard", "switchboard")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Check values the relay cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid("hub.mailbox_capacity must be at least 1".into()));
        }
        if self.hub.event_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "hub.event_queue_capacity must be at least 1".into(),
            ));
        }
        if self.transport.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "transport.max_message_size must be at least 1".into(),
            ));
        }
        if self.transport.ping_period_secs == 0
            || self.transport.ping_period_secs >= self.transport.pong_wait_secs
        {
            return Err(ConfigError::Invalid(format!(
                "transport.ping_period_secs ({}) must be non-zero and shorter than pong_wait_secs ({})",
                self.transport.ping_period_secs, self.transport.pong_wait_secs
            )));
        }
        if !self.server.ws_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "server.ws_path must start with '/': {}",
                self.server.ws_path
            )));
        }
        Ok(())
    }

    /// Render the configuration as pretty TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Generate a sample configuration file content
    pub fn sample() -> String {
        Self::default().to_toml().unwrap_or_default()
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

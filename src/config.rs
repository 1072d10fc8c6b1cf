//! Configuration for the gate client
//!
//! Loaded from a TOML file. Every field has a default that matches the
//! controller deployment (secure WebSocket on port 9001, path `/ws`), so an
//! empty file plus `GATE_MQTT_HOST` is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable overriding `broker.host`
pub const HOST_ENV_VAR: &str = "GATE_MQTT_HOST";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GateConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// WebSocket scheme used to reach the broker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrokerProtocol {
    /// WebSocket over TLS
    Wss,
    /// Plain WebSocket, for local test brokers
    Ws,
}

impl BrokerProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            BrokerProtocol::Wss => "wss",
            BrokerProtocol::Ws => "ws",
        }
    }
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker host name; empty means "take it from GATE_MQTT_HOST"
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_protocol")]
    pub protocol: BrokerProtocol,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Fixed delay between reconnection attempts
    #[serde(default = "default_reconnect_period")]
    pub reconnect_period_ms: u64,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// QoS used for notification subscriptions
    #[serde(default = "default_subscribe_qos")]
    pub subscribe_qos: u8,
    /// QoS used for outbound commands
    #[serde(default)]
    pub publish_qos: u8,
}

fn default_port() -> u16 {
    9001
}

fn default_path() -> String {
    "/ws".to_string()
}

fn default_protocol() -> BrokerProtocol {
    BrokerProtocol::Wss
}

fn default_keep_alive() -> u64 {
    30
}

fn default_reconnect_period() -> u64 {
    5000
}

fn default_clean_session() -> bool {
    true
}

fn default_subscribe_qos() -> u8 {
    1
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            path: default_path(),
            protocol: default_protocol(),
            keep_alive_secs: default_keep_alive(),
            reconnect_period_ms: default_reconnect_period(),
            clean_session: default_clean_session(),
            subscribe_qos: default_subscribe_qos(),
            publish_qos: 0,
        }
    }
}

impl BrokerSection {
    /// Broker URL, e.g. `wss://gate.example.com:9001/ws`
    pub fn url(&self) -> Result<Url, ConfigError> {
        let raw = format!(
            "{}://{}:{}{}",
            self.protocol.scheme(),
            self.host,
            self.port,
            self.path
        );
        let url = Url::parse(&raw).map_err(|_| ConfigError::InvalidBrokerUrl(raw.clone()))?;
        if url.host_str().is_none() {
            return Err(ConfigError::InvalidBrokerUrl(raw));
        }
        Ok(url)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.reconnect_period_ms)
    }
}

/// Session policy settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// Advisory window: warn when not connected within this many seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    /// Period of the status/statistics refresh requests while connected
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_refresh_interval() -> u64 {
    5
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            connection_timeout_secs: default_connection_timeout(),
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

impl SessionSection {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Credential store location
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreSection {
    /// Directory holding `user.json` and `profile.json`
    pub dir: Option<PathBuf>,
}

impl StoreSection {
    /// Configured directory, falling back to `$HOME/.config/gatelink`
    pub fn resolve_dir(&self) -> PathBuf {
        if let Some(dir) = &self.dir {
            return dir.clone();
        }
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("gatelink")
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Broker host is not set (use [broker] host or GATE_MQTT_HOST)")]
    MissingHost,
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GateConfig {
    /// Load configuration from a TOML file, apply environment overrides and validate
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text, apply environment overrides and validate
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: GateConfig = toml::from_str(content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, used when no file exists
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = GateConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var(HOST_ENV_VAR) {
            if !host.trim().is_empty() {
                self.broker.host = host.trim().to_string();
            }
        }
    }

    /// Check value ranges and that a usable broker URL can be built
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::MissingHost);
        }
        if !self.broker.path.starts_with('/') {
            return Err(ConfigError::InvalidConfig(format!(
                "broker.path must start with '/': {}",
                self.broker.path
            )));
        }
        if self.broker.subscribe_qos > 2 || self.broker.publish_qos > 2 {
            return Err(ConfigError::InvalidConfig(
                "QoS levels must be 0, 1 or 2".to_string(),
            ));
        }
        if self.broker.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.keep_alive_secs must be greater than 0".to_string(),
            ));
        }
        if self.broker.reconnect_period_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.reconnect_period_ms must be greater than 0".to_string(),
            ));
        }
        if self.session.refresh_interval_secs == 0 || self.session.connection_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "session intervals must be greater than 0".to_string(),
            ));
        }
        self.broker.url()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(host: &str) -> BrokerSection {
        BrokerSection {
            host: host.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_match_deployment() {
        let config = GateConfig::default();
        assert_eq!(config.broker.port, 9001);
        assert_eq!(config.broker.path, "/ws");
        assert_eq!(config.broker.protocol, BrokerProtocol::Wss);
        assert_eq!(config.broker.keep_alive(), Duration::from_secs(30));
        assert_eq!(config.broker.reconnect_period(), Duration::from_millis(5000));
        assert!(config.broker.clean_session);
        assert_eq!(config.broker.subscribe_qos, 1);
        assert_eq!(config.session.connection_timeout(), Duration::from_secs(10));
        assert_eq!(config.session.refresh_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_broker_url() {
        let url = broker("gate.example.com").url().unwrap();
        assert_eq!(url.as_str(), "wss://gate.example.com:9001/ws");

        let plain = BrokerSection {
            protocol: BrokerProtocol::Ws,
            port: 8080,
            path: "/mqtt".to_string(),
            ..broker("localhost")
        };
        assert_eq!(plain.url().unwrap().as_str(), "ws://localhost:8080/mqtt");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = GateConfig {
            broker: broker("gate.example.com"),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.broker.path = "ws".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));

        config.broker.path = "/ws".to_string();
        config.broker.subscribe_qos = 3;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));

        config.broker.subscribe_qos = 1;
        config.session.refresh_interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_requires_host() {
        let config = GateConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingHost)));
    }

    #[test]
    fn test_invalid_host_is_rejected() {
        let config = GateConfig {
            broker: broker("bad host name"),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_store_dir_prefers_explicit_path() {
        let store = StoreSection {
            dir: Some(PathBuf::from("/tmp/gate-store")),
        };
        assert_eq!(store.resolve_dir(), PathBuf::from("/tmp/gate-store"));
    }
}

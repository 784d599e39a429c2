// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway configuration.
//!
//! Loaded from an optional TOML file; command-line flags override it.
//!
//! ```toml
//! bind = "0.0.0.0"
//! port = 3000
//! hub_name = "pnplink.local"
//! consumer_group = "$Default"
//!
//! [relay]
//! subscriber_buffer = 256
//! send_timeout_ms = 5000
//!
//! [simulator]
//! devices = 2
//! telemetry_interval_ms = 1000
//! ```

use pnplink::relay::RelayConfig;
use pnplink::ConnectionString;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// HTTP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Maximum concurrent push-channel clients.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// Host name of the in-process hub.
    #[serde(default = "default_hub_name")]
    pub hub_name: String,

    /// Consumer group used to read the telemetry log.
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Initial service connection string.
    #[serde(default)]
    pub connection_string: Option<String>,

    #[serde(default)]
    pub relay: RelaySection,

    #[serde(default)]
    pub simulator: SimulatorSection,
}

/// `[relay]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

/// `[simulator]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorSection {
    /// Number of simulated thermostats (0 disables the simulator).
    #[serde(default)]
    pub devices: usize,

    #[serde(default = "default_telemetry_interval_ms")]
    pub telemetry_interval_ms: u64,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_clients() -> usize {
    100
}

fn default_hub_name() -> String {
    "pnplink.local".to_string()
}

fn default_consumer_group() -> String {
    "$Default".to_string()
}

fn default_subscriber_buffer() -> usize {
    pnplink::relay::DEFAULT_SUBSCRIBER_BUFFER
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_telemetry_interval_ms() -> u64 {
    1000
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for SimulatorSection {
    fn default() -> Self {
        Self {
            devices: 0,
            telemetry_interval_ms: default_telemetry_interval_ms(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            hub_name: default_hub_name(),
            consumer_group: default_consumer_group(),
            connection_string: None,
            relay: RelaySection::default(),
            simulator: SimulatorSection::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind.trim().is_empty() {
            return Err(ConfigError::Invalid("Bind address is empty".into()));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Unknown log level '{}'",
                self.log_level
            )));
        }
        if self.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be at least 1".into()));
        }
        if self.hub_name.trim().is_empty() {
            return Err(ConfigError::Invalid("Hub name is empty".into()));
        }
        if self.consumer_group.trim().is_empty() {
            return Err(ConfigError::Invalid("Consumer group is empty".into()));
        }
        if self.relay.subscriber_buffer == 0 {
            return Err(ConfigError::Invalid(
                "relay.subscriber_buffer must be at least 1".into(),
            ));
        }
        if self.relay.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "relay.send_timeout_ms must be at least 1".into(),
            ));
        }
        if self.simulator.devices > 0 && self.simulator.telemetry_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "simulator.telemetry_interval_ms must be at least 1".into(),
            ));
        }
        self.parsed_connection_string()?;
        Ok(())
    }

    /// Initial connection string, parsed. Empty counts as unset.
    pub fn parsed_connection_string(&self) -> Result<Option<ConnectionString>, ConfigError> {
        match self.connection_string.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e| ConfigError::Invalid(format!("Connection string: {}", e))),
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            subscriber_buffer: self.relay.subscriber_buffer,
            send_timeout: Duration::from_millis(self.relay.send_timeout_ms),
        }
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.simulator.telemetry_interval_ms)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.relay_config(), RelayConfig::default());
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
port = 8088
connection_string = "HostName=hub.example.net;SharedAccessKeyName=owner;SharedAccessKey=a2V5"

[simulator]
devices = 3
"#
        )
        .unwrap();

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 8088);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.simulator.devices, 3);
        assert_eq!(config.simulator.telemetry_interval_ms, 1000);
        assert_eq!(config.relay.subscriber_buffer, 256);
        let cs = config.parsed_connection_string().unwrap().unwrap();
        assert_eq!(cs.hub_name(), "hub.example.net");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = GatewayConfig::default();
        config.relay.send_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = GatewayConfig::default();
        config.log_level = "loud".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = GatewayConfig::default();
        config.connection_string = Some("SharedAccessKey=abc".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_connection_string_is_unset() {
        let mut config = GatewayConfig::default();
        config.connection_string = Some("  ".into());
        assert!(config.parsed_connection_string().unwrap().is_none());
    }

    #[test]
    fn test_bad_toml_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();
        assert!(matches!(
            GatewayConfig::from_file(file.path()),
            Err(ConfigError::Toml(_))
        ));
    }
}

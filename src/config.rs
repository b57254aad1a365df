//! Configuration for the MQTT5 transport
//!
//! A TOML file names the local endpoint (`[source]`) and how to reach the
//! broker (`[mqtt]`). Credentials are never stored in the file; only the names
//! of the environment variables holding them.

use crate::protocol::{UUri, topics};
use crate::transport::mqtt::ReconnectConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Complete transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    pub source: SourceSection,
    pub mqtt: MqttSection,
}

/// Address of the local endpoint, used as the transport source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceSection {
    pub authority: String,
    pub ue_id: u32,
    pub ue_version_major: u8,
    #[serde(default)]
    pub resource_id: u16,
}

impl SourceSection {
    pub fn to_uri(&self) -> UUri {
        UUri::new(
            self.authority.clone(),
            self.ue_id,
            self.ue_version_major,
            self.resource_id,
        )
    }
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, `mqtt://` or `mqtts://`
    pub broker_url: String,
    /// Client identifier; generated per connection when absent
    pub client_id: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: u32,
    /// Capacity of the client's outgoing request queue
    #[serde(default = "default_request_channel_capacity")]
    pub request_channel_capacity: usize,
    /// How long `connect` waits for the first CONNACK
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_keep_alive() -> u64 {
    60
}

fn default_max_packet_size() -> u32 {
    256 * 1024
}

fn default_request_channel_capacity() -> usize {
    10
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl MqttSection {
    /// Settings for a broker URL with every other field at its default
    pub fn with_broker_url(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            client_id: None,
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive(),
            max_packet_size: default_max_packet_size(),
            request_channel_capacity: default_request_channel_capacity(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Username from the configured environment variable
    pub fn username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_deref())
    }

    /// Password from the configured environment variable
    pub fn password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_deref())
    }
}

fn get_env_var_optional(env_var_name: Option<&str>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TransportConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: TransportConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let source = self.source.to_uri();
        if source.authority_name.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "source.authority must not be empty".to_string(),
            ));
        }
        topics::check_publish_address(&source)
            .map_err(|e| ConfigError::InvalidConfig(format!("source: {e}")))?;
        if !self.mqtt.broker_url.starts_with("mqtt://")
            && !self.mqtt.broker_url.starts_with("mqtts://")
        {
            return Err(ConfigError::InvalidConfig(format!(
                "broker_url '{}' must use mqtt:// or mqtts://",
                self.mqtt.broker_url
            )));
        }
        if self.mqtt.request_channel_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.request_channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[source]
authority = "device1"
ue_id = 256
ue_version_major = 1

[mqtt]
broker_url = "mqtt://localhost:1883"
"#;
        Self::from_toml(toml_content).expect("Test config should parse")
    }
}

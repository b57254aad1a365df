//! Pure connection state management for the broker client
//!
//! Connection states, the reconnection backoff policy, broker errors and the
//! translation of `[mqtt]` settings into rumqttc options.

use crate::config::MqttSection;
use rumqttc::Transport as RumqttcTransport;
use rumqttc::v5::MqttOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state for the broker client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Permanently disconnected - max reconnection attempts exceeded or closed
    PermanentlyDisconnected(String),
}

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds, one entry per attempt
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    /// Total time spent sleeping across all attempts, None when unlimited
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            (1..=max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .sum()
        })
    }

    /// Delay before the given (1-based) attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Errors raised by the broker client
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BrokerError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Client request failed: {0}")]
    Client(String),
    #[error("Broker refused subscription: {0}")]
    SubscriptionRejected(String),
    #[error("Operation was dropped before it completed")]
    Cancelled,
}

/// Configure rumqttc options from `[mqtt]` settings
pub fn configure_mqtt_options(config: &MqttSection) -> Result<MqttOptions, BrokerError> {
    let url = Url::parse(&config.broker_url)
        .map_err(|_| BrokerError::InvalidBrokerUrl(config.broker_url.clone()))?;

    let secure = match url.scheme() {
        "mqtt" => false,
        "mqtts" => true,
        _ => return Err(BrokerError::InvalidBrokerUrl(config.broker_url.clone())),
    };

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| BrokerError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let port = url.port().unwrap_or(if secure { 8883 } else { 1883 });

    // generated per process unless configured
    let client_id = config
        .client_id
        .clone()
        .unwrap_or_else(|| format!("up-mqtt5-{}", uuid::Uuid::new_v4().simple()));
    let mut mqtt_options = MqttOptions::new(client_id, host, port);

    if secure {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.username() {
        let password = config.password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_max_packet_size(Some(config.max_packet_size));
    mqtt_options.set_clean_start(true);

    Ok(mqtt_options)
}

//! Pure connection state management for the MQTT session
//!
//! This module contains pure functions for connection state management and
//! option construction.

use crate::config::BrokerParams;
use rumqttc::{MqttOptions, Transport as RumqttcTransport};
use std::time::Duration;
use thiserror::Error;

/// Port of the TLS listener on the TTN clusters
pub const TLS_PORT: u16 = 8883;

/// Uplink envelopes carry gateway metadata and easily exceed the 10KB default
pub const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Connection state for the MQTT session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Waiting for the broker's CONNACK
    Connecting,
    /// Acknowledged and ready for subscribe/publish
    Connected,
    /// Closed on request
    Disconnected(String),
    /// Lost or refused; not retried
    Failed(String),
}

impl ConnectionState {
    /// Whether the state will never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected(_) | ConnectionState::Failed(_)
        )
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid connection parameters: {0}")]
    InvalidParams(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

/// Build rumqttc options for a TTN cluster
pub fn configure_mqtt_options(params: &BrokerParams) -> Result<MqttOptions, MqttError> {
    params
        .validate()
        .map_err(|e| MqttError::InvalidParams(e.to_string()))?;

    let client_id = params
        .mqtt
        .client_id
        .clone()
        .unwrap_or_else(|| format!("ttn-bridge-{}", chrono::Utc::now().timestamp_millis()));
    let port = resolve_port(params.mqtt.port, params.mqtt.tls);

    let mut mqtt_options = MqttOptions::new(client_id, params.host(), port);
    if params.mqtt.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    mqtt_options.set_credentials(params.user_id.clone(), params.access_key.clone());
    mqtt_options.set_keep_alive(Duration::from_secs(params.mqtt.keep_alive_secs));
    mqtt_options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    Ok(mqtt_options)
}

/// TLS sessions default to 8883 unless a non-default port was configured
pub fn resolve_port(configured: u16, tls: bool) -> u16 {
    if tls && configured == 1883 {
        TLS_PORT
    } else {
        configured
    }
}

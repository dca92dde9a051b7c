//! Transport layer for the broker session
//!
//! This module provides the session abstraction the connection manager
//! drives, and the rumqttc implementation of it.

use crate::transport::mqtt::{ConnectionState, MqttError};
use tokio::sync::mpsc;

pub mod mqtt;

/// A publish received from the broker, before envelope decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPublish {
    pub topic: String,
    /// `None` when the broker event carried no payload
    pub payload: Option<Vec<u8>>,
}

impl InboundPublish {
    pub fn new(topic: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            topic: topic.into(),
            payload: (!payload.is_empty()).then(|| payload.to_vec()),
        }
    }
}

/// One long-lived broker session
///
/// This trait lets the connection manager run against the real MQTT client
/// or an in-memory session in tests.
#[async_trait::async_trait]
pub trait BrokerSession: Send + Sync + 'static {
    /// Open the connection and forward every received publish to `inbound`.
    /// Returns once the broker has acknowledged the connection.
    async fn connect(&mut self, inbound: mpsc::Sender<InboundPublish>) -> Result<(), MqttError>;

    /// Subscribe to a topic filter
    async fn subscribe(&mut self, filter: &str) -> Result<(), MqttError>;

    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError>;

    /// Close the connection
    async fn disconnect(&mut self) -> Result<(), MqttError>;

    /// Resolves with the cause once the connection is lost for good
    async fn closed(&self) -> MqttError;

    /// Current connection state, `None` before `connect()`
    fn connection_state(&self) -> Option<ConnectionState>;
}

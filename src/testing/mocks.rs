//! Mock implementations for testing
//!
//! Provides an in-memory [`BrokerSession`] that records what the bridge sends
//! and lets tests inject uplinks or simulate broker failures.

use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::{BrokerSession, InboundPublish};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

pub type PublishedMessage = (String, Vec<u8>);

/// Mock broker session for testing
///
/// Clones share all recorded state, so a test can keep one clone while the
/// bridge owns the other.
#[derive(Debug, Clone)]
pub struct MockSession {
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub subscriptions: Arc<Mutex<Vec<String>>>,
    pub inbound_sender: Arc<Mutex<Option<mpsc::Sender<InboundPublish>>>>,
    pub connect_failure: Option<String>,
    pub connect_delay: Option<Duration>,
    pub failing_publish_calls: HashSet<usize>,
    pub failing_devices: HashSet<String>,
    publish_calls: Arc<AtomicUsize>,
    disconnect_calls: Arc<AtomicUsize>,
    state: Arc<watch::Sender<Option<ConnectionState>>>,
}

impl Default for MockSession {
    fn default() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            published_messages: Arc::default(),
            subscriptions: Arc::default(),
            inbound_sender: Arc::default(),
            connect_failure: None,
            connect_delay: None,
            failing_publish_calls: HashSet::new(),
            failing_devices: HashSet::new(),
            publish_calls: Arc::default(),
            disconnect_calls: Arc::default(),
            state: Arc::new(state),
        }
    }
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// `connect()` fails with `reason`, as a refused CONNACK would
    pub fn with_connect_failure(mut self, reason: impl Into<String>) -> Self {
        self.connect_failure = Some(reason.into());
        self
    }

    /// `connect()` takes `delay` before the broker acknowledges
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// The publish call with this zero-based index fails
    pub fn with_failing_publish(mut self, call_index: usize) -> Self {
        self.failing_publish_calls.insert(call_index);
        self
    }

    /// Every publish to this device's downlink topic fails
    pub fn with_failing_device(mut self, device_id: impl Into<String>) -> Self {
        self.failing_devices.insert(device_id.into());
        self
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Deliver a publish as if the broker had sent it.
    /// Returns false when the session is not connected.
    pub async fn inject(&self, topic: &str, payload: &[u8]) -> bool {
        let sender = self.inbound_sender.lock().await.clone();
        match sender {
            Some(sender) => sender
                .send(InboundPublish::new(topic, payload))
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Drop the connection as a broker or network failure would
    pub fn sever(&self, reason: impl Into<String>) {
        self.state
            .send_replace(Some(ConnectionState::Failed(reason.into())));
    }

    fn is_connected(&self) -> bool {
        matches!(*self.state.borrow(), Some(ConnectionState::Connected))
    }

    fn is_failing_topic(&self, topic: &str) -> bool {
        self.failing_devices
            .iter()
            .any(|device| topic.contains(&format!("/devices/{device}/")))
    }
}

#[async_trait]
impl BrokerSession for MockSession {
    async fn connect(&mut self, inbound: mpsc::Sender<InboundPublish>) -> Result<(), MqttError> {
        self.state.send_replace(Some(ConnectionState::Connecting));
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = &self.connect_failure {
            self.state
                .send_replace(Some(ConnectionState::Failed(reason.clone())));
            return Err(MqttError::ConnectionFailedStr(reason.clone()));
        }

        *self.inbound_sender.lock().await = Some(inbound);
        self.state.send_replace(Some(ConnectionState::Connected));
        Ok(())
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), MqttError> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected {
                state: ConnectionState::Connecting,
            });
        }
        self.subscriptions.lock().await.push(filter.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        let call = self.publish_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(state) = self.connection_state() {
            if state != ConnectionState::Connected {
                return Err(MqttError::NotConnected { state });
            }
        }
        if self.failing_publish_calls.contains(&call) || self.is_failing_topic(topic) {
            return Err(MqttError::PublishFailed(
                format!("Mock publish failure on call {call}").into(),
            ));
        }

        self.published_messages
            .lock()
            .await
            .push((topic.to_string(), payload));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.inbound_sender.lock().await.take();
        if self.is_connected() {
            self.state.send_replace(Some(ConnectionState::Disconnected(
                "Client disconnected".to_string(),
            )));
        }
        Ok(())
    }

    async fn closed(&self) -> MqttError {
        let mut state_rx = self.state.subscribe();
        let result = state_rx
            .wait_for(|state| matches!(state, Some(state) if state.is_terminal()))
            .await
            .map(|state| state.clone());

        match result {
            Ok(Some(ConnectionState::Failed(reason)))
            | Ok(Some(ConnectionState::Disconnected(reason))) => {
                MqttError::ConnectionLost(reason)
            }
            _ => MqttError::ConnectionLost("Mock session dropped".to_string()),
        }
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        self.state.borrow().clone()
    }
}

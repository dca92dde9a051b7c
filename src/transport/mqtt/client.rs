//! Impure I/O operations for the MQTT session
//!
//! This module owns the rumqttc client, spawns the event loop task and
//! reports connection state changes through a `watch` channel.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError};
use super::event_router::{EventRoute, EventRouter};
use crate::config::BrokerParams;
use crate::transport::{BrokerSession, InboundPublish};
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, QoS};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CAPACITY: usize = 10;

/// How long `disconnect()` waits for the event loop to flush the DISCONNECT
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// rumqttc-backed broker session for one TTN application
pub struct MqttSession {
    client: AsyncClient,
    /// Taken by `connect()`; the mutex keeps the session `Sync`
    event_loop: Mutex<Option<EventLoop>>,
    host: String,
    connect_timeout: Duration,
    event_loop_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl MqttSession {
    pub fn new(params: &BrokerParams) -> Result<Self, MqttError> {
        let mqtt_options = configure_mqtt_options(params)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        Ok(MqttSession {
            client,
            event_loop: Mutex::new(Some(event_loop)),
            host: params.host(),
            connect_timeout: Duration::from_secs(params.mqtt.connect_timeout_secs),
            event_loop_handle: None,
            state_rx: None,
            shutdown_tx: None,
        })
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels = watch::channel(ConnectionState::Connecting);
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    /// Wait for the broker's CONNACK, bounded by `timeout`
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                let state = state_rx.borrow_and_update().clone();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Failed(reason) | ConnectionState::Disconnected(reason) => {
                        return Err(MqttError::ConnectionFailedStr(reason));
                    }
                    ConnectionState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailedStr(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    /// Drive the rumqttc event loop until shutdown, disconnect or error.
    /// Connection errors end the task; nothing is retried here.
    async fn run_event_loop(
        mut event_loop: EventLoop,
        state_tx: watch::Sender<ConnectionState>,
        mut shutdown_rx: watch::Receiver<bool>,
        inbound: mpsc::Sender<InboundPublish>,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT event loop");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            let route = EventRouter::route_mqtt_event(&event);
                            if !Self::process_event_route(route, &state_tx, &inbound).await {
                                break;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "MQTT event loop error");
                            let _ = state_tx.send(ConnectionState::Failed(e.to_string()));
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Process a routed event. Returns true to keep polling, false to stop.
    async fn process_event_route(
        route: EventRoute,
        state_tx: &watch::Sender<ConnectionState>,
        inbound: &mpsc::Sender<InboundPublish>,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                info!("MQTT connection acknowledged");
                let _ = state_tx.send(ConnectionState::Connected);
                true
            }
            EventRoute::ConnectionRefused(reason) => {
                error!(reason = %reason, "MQTT connection refused");
                let _ = state_tx.send(ConnectionState::Failed(format!(
                    "Connection refused: {reason}"
                )));
                false
            }
            EventRoute::MessageReceived(publish) => {
                debug!(target: "mqtt_transport", topic = %publish.topic, "Received MQTT message");
                if inbound.send(publish).await.is_err() {
                    debug!(target: "mqtt_transport", "Inbound receiver closed, message dropped");
                }
                true
            }
            EventRoute::Disconnected => {
                warn!("MQTT broker closed the connection");
                let _ = state_tx.send(ConnectionState::Failed("Broker disconnected".to_string()));
                false
            }
            EventRoute::DisconnectSent => {
                let _ = state_tx.send(ConnectionState::Disconnected(
                    "Client disconnected".to_string(),
                ));
                false
            }
            EventRoute::SubscriptionConfirmed { packet_id, granted } => {
                if granted {
                    debug!(target: "mqtt_transport", packet_id, "Subscription confirmed");
                } else {
                    warn!(packet_id, "Broker refused subscription");
                }
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    fn check_connection_state(&self) -> Result<(), MqttError> {
        let state = self.connection_state().ok_or(MqttError::NotConnected {
            state: ConnectionState::Connecting,
        })?;
        if state != ConnectionState::Connected {
            return Err(MqttError::NotConnected { state });
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn connect(&mut self, inbound: mpsc::Sender<InboundPublish>) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| {
                MqttError::ConnectionFailedStr("Event loop already started".to_string())
            })?;

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            Self::setup_connection_channels();
        self.state_rx = Some(state_rx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        info!(host = %self.host, "Connecting to TTN MQTT server");
        self.event_loop_handle = Some(tokio::spawn(Self::run_event_loop(
            event_loop,
            state_tx,
            shutdown_rx,
            inbound,
        )));

        Self::wait_for_connection_confirmation(state_rx, self.connect_timeout).await
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), MqttError> {
        self.check_connection_state()?;

        info!("Subscribing to topic filter: {}", filter);
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| {
                MqttError::SubscriptionFailed(
                    format!("Failed to subscribe to {filter}: {e}").into(),
                )
            })
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        self.check_connection_state()?;

        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        let Some(handle) = self.event_loop_handle.take() else {
            debug!("MQTT session was never connected, nothing to disconnect");
            return Ok(());
        };

        let result = if handle.is_finished() {
            Ok(())
        } else {
            self.client
                .disconnect()
                .await
                .map_err(|e| MqttError::ConnectionFailed(Box::new(e)))
        };

        match tokio::time::timeout(DISCONNECT_GRACE, handle).await {
            Ok(Ok(())) => info!("MQTT event loop shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("MQTT event loop ended with error: {}", e),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("MQTT event loop didn't shut down gracefully, stopping it");
                if let Some(shutdown_tx) = &self.shutdown_tx {
                    let _ = shutdown_tx.send(true);
                }
            }
        }

        info!("MQTT session disconnected");
        result
    }

    async fn closed(&self) -> MqttError {
        let Some(mut state_rx) = self.state_rx.clone() else {
            return std::future::pending().await;
        };

        loop {
            let state = state_rx.borrow_and_update().clone();
            match state {
                ConnectionState::Failed(reason) | ConnectionState::Disconnected(reason) => {
                    return MqttError::ConnectionLost(reason);
                }
                ConnectionState::Connecting | ConnectionState::Connected => {}
            }
            if state_rx.changed().await.is_err() {
                return MqttError::ConnectionLost("MQTT event loop stopped".to_string());
            }
        }
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

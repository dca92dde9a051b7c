//! Pure routing logic for rumqttc events
//!
//! This module turns raw event loop output into routing decisions so the
//! I/O side only acts on them.

use crate::transport::InboundPublish;
use rumqttc::{ConnectReturnCode, Event, Outgoing, Packet, SubscribeReasonCode};

/// Pure routing decisions based on MQTT events
pub struct EventRouter;

impl EventRouter {
    /// Route an MQTT event (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => match &connack.code {
                    ConnectReturnCode::Success => EventRoute::ConnectionAcknowledged,
                    code => EventRoute::ConnectionRefused(format!("{code:?}")),
                },
                Packet::Publish(publish) => EventRoute::MessageReceived(InboundPublish::new(
                    publish.topic.clone(),
                    &publish.payload,
                )),
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    granted: suback
                        .return_codes
                        .iter()
                        .all(|code| matches!(code, SubscribeReasonCode::Success(_))),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK with a success code
    ConnectionAcknowledged,
    /// CONNACK with a refusal code, e.g. bad credentials
    ConnectionRefused(String),
    /// Message received on a subscribed topic
    MessageReceived(InboundPublish),
    /// Broker closed the connection
    Disconnected,
    /// SUBACK; `granted` is false when any filter was refused
    SubscriptionConfirmed { packet_id: u16, granted: bool },
    /// Infrastructure event (PingResp, PubAck, etc.)
    InfrastructureEvent(String),
    /// Our DISCONNECT was written to the socket
    DisconnectSent,
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

//! Wire envelopes and in-process message types
//!
//! The uplink/downlink structs mirror the JSON The Things Network v3 MQTT
//! server produces and consumes. `Message` and `OutboundItem` are the values
//! the bridge moves between the broker and local code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed LoRaWAN FPort used for every downlink
pub const DOWNLINK_F_PORT: u16 = 15;

/// Fixed downlink scheduling priority
pub const DOWNLINK_PRIORITY: &str = "NORMAL";

/// Uplink envelope as published by the network server
///
/// Every level is optional: the server publishes many event types on the
/// same account and only uplinks carry a decoded payload.
///
/// # Examples
/// ```
/// use ttn_bridge::protocol::UplinkEnvelope;
///
/// let raw = br#"{"end_device_ids":{"device_id":"dev1"},"uplink_message":{}}"#;
/// let envelope = UplinkEnvelope::parse(raw).unwrap();
/// assert_eq!(envelope.device_id(), Some("dev1"));
/// assert!(envelope.decoded_bytes().is_none());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UplinkEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uplink_message: Option<UplinkMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_device_ids: Option<EndDeviceIds>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UplinkMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_payload: Option<DecodedPayload>,
}

/// Output of the application's payload formatter
///
/// Values are kept as `i64` so that a handler inspecting the envelope sees
/// what the formatter produced. The codec reads `bytes` on its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DecodedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EndDeviceIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl UplinkEnvelope {
    /// Parse a raw MQTT payload as an uplink envelope
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    /// The `uplink_message.decoded_payload.bytes` array, if every level is present
    pub fn decoded_bytes(&self) -> Option<&[i64]> {
        self.uplink_message
            .as_ref()?
            .decoded_payload
            .as_ref()?
            .bytes
            .as_deref()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.end_device_ids.as_ref()?.device_id.as_deref()
    }
}

/// Downlink push envelope
///
/// # Examples
/// ```
/// use ttn_bridge::protocol::DownlinkEnvelope;
///
/// let envelope = DownlinkEnvelope::single("AQID".to_string(), "id-1".to_string());
/// let json = serde_json::to_value(&envelope).unwrap();
/// assert_eq!(json["downlinks"][0]["f_port"], 15);
/// assert_eq!(json["downlinks"][0]["priority"], "NORMAL");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownlinkEnvelope {
    pub downlinks: Vec<Downlink>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Downlink {
    pub f_port: u16,
    /// Base64 encoded application payload
    pub frm_payload: String,
    pub priority: String,
    pub correlation_ids: Vec<String>,
}

impl DownlinkEnvelope {
    /// Envelope with one downlink at the fixed port and priority
    pub fn single(frm_payload: String, correlation_id: String) -> Self {
        Self {
            downlinks: vec![Downlink {
                f_port: DOWNLINK_F_PORT,
                frm_payload,
                priority: DOWNLINK_PRIORITY.to_string(),
                correlation_ids: vec![correlation_id],
            }],
        }
    }
}

/// Decoded inbound message handed to registered handlers
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    topic: String,
    decoded_payload: Option<Vec<u8>>,
    raw_payload: Option<Vec<u8>>,
}

impl Message {
    pub fn new(
        topic: impl Into<String>,
        decoded_payload: Option<Vec<u8>>,
        raw_payload: Option<Vec<u8>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            decoded_payload,
            raw_payload,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Application bytes from `uplink_message.decoded_payload.bytes`
    pub fn decoded_payload(&self) -> Option<&[u8]> {
        self.decoded_payload.as_deref()
    }

    /// The MQTT payload exactly as received
    pub fn raw_payload(&self) -> Option<&[u8]> {
        self.raw_payload.as_deref()
    }

    /// Device id taken from a `v3/{user}/devices/{device}/...` topic
    pub fn device_id(&self) -> Option<&str> {
        super::topics::device_id_from_topic(&self.topic)
    }

    /// Re-parse the raw payload for envelope metadata such as `received_at`
    pub fn envelope(&self) -> Option<UplinkEnvelope> {
        self.raw_payload
            .as_deref()
            .and_then(|raw| UplinkEnvelope::parse(raw).ok())
    }
}

/// A pending downlink, immutable once queued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundItem {
    device_id: String,
    payload: Vec<u8>,
}

impl OutboundItem {
    pub fn new(device_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            device_id: device_id.into(),
            payload: payload.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

//! TTN Bridge - Rust Implementation
//!
//! Bridges The Things Network MQTT server and a local application.
//!
//! # Overview
//!
//! This crate provides:
//! - Uplink/downlink envelope codec for the TTN v3 JSON formats
//! - A single long-lived MQTT session with a `#` subscription
//! - An outbound queue drained by a dedicated worker task
//! - A dispatch hub that fans decoded uplinks out to registered handlers
//!
//! # Quick Start
//!
//! ```rust
//! use ttn_bridge::protocol::{decode_uplink, encode_downlink, DownlinkEnvelope};
//!
//! let uplink = br#"{"uplink_message":{"decoded_payload":{"bytes":[72,105]}}}"#;
//! assert_eq!(decode_uplink(uplink).unwrap(), Some(b"Hi".to_vec()));
//!
//! let downlink = encode_downlink(&[1, 2, 3]).unwrap();
//! let envelope: DownlinkEnvelope = serde_json::from_slice(&downlink).unwrap();
//! assert_eq!(envelope.downlinks[0].frm_payload, "AQID");
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use bridge::{handler_fn, Bridge, BridgeHandle, DispatchOutcome, EngineState, MessageHandler};
pub use config::*;
pub use error::{BridgeError, BridgeResult};
pub use protocol::*;
pub use transport::mqtt::MqttSession;
pub use transport::BrokerSession;

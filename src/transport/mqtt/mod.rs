//! MQTT session for The Things Network
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state and option construction
//! - [`event_router`] - Pure routing of rumqttc events
//! - [`client`] - Impure I/O: the rumqttc client and its event loop task
//!
//! # Usage
//!
//! ```rust,no_run
//! use ttn_bridge::config::BrokerParams;
//! use ttn_bridge::transport::mqtt::MqttSession;
//! use ttn_bridge::transport::BrokerSession;
//!
//! # tokio_test::block_on(async {
//! let params = BrokerParams::new("eu1", "my-app@ttn", "NNSXS.KEY");
//! let (inbound_tx, _inbound_rx) = tokio::sync::mpsc::channel(100);
//!
//! let mut session = MqttSession::new(&params)?;
//! session.connect(inbound_tx).await?;
//! session.subscribe("#").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod event_router;

pub use client::MqttSession;
pub use connection::{configure_mqtt_options, ConnectionState, MqttError};
pub use event_router::{EventRoute, EventRouter};

//! TTN v3 wire formats
//!
//! Uplink/downlink envelopes, the codec converting them to and from
//! application bytes, and topic construction.

pub mod codec;
pub mod messages;
pub mod topics;

pub use codec::*;
pub use messages::*;
pub use topics::*;

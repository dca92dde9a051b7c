//! Testing utilities and mock implementations
//!
//! Lets the bridge be exercised end to end without a running MQTT broker.

pub mod mocks;

pub use mocks::*;

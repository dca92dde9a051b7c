//! Bridge engine
//!
//! The outbound queue, the connection manager that drains it, the dispatch
//! hub that fans out uplinks, and the [`Bridge`] controller tying them together.

pub mod dispatch;
pub mod lifecycle;
pub mod manager;
pub mod queue;
pub mod state;

pub use dispatch::{
    handler_fn, DispatchHub, DispatchOutcome, FnHandler, HandlerError, MessageHandler,
};
pub use lifecycle::{Bridge, BridgeHandle};
pub use manager::{ConnectionManager, DrainReport, EngineContext};
pub use queue::OutboundQueue;
pub use state::{EngineState, StateCell};

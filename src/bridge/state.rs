//! Engine state machine
//!
//! `Idle -> Connecting -> Running -> Stopping -> Stopped`, with `Failed`
//! reachable from `Connecting` and `Running`.

use std::fmt;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Connecting,
    Running,
    Stopping,
    Stopped,
    Failed(String),
}

impl EngineState {
    /// Whether `self -> next` is a legal transition (pure function)
    pub fn can_transition_to(&self, next: &EngineState) -> bool {
        use EngineState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Stopped)
                | (Connecting, Running)
                | (Connecting, Failed(_))
                | (Running, Stopping)
                | (Running, Failed(_))
                | (Stopping, Stopped)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Stopped | EngineState::Failed(_))
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Connecting => write!(f, "connecting"),
            EngineState::Running => write!(f, "running"),
            EngineState::Stopping => write!(f, "stopping"),
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Observable engine state shared between the controller and the worker
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<EngineState>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(EngineState::Idle);
        Self { tx }
    }

    pub fn get(&self) -> EngineState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.tx.subscribe()
    }

    /// Apply a transition if legal; returns whether it was applied
    pub fn transition(&self, next: EngineState) -> bool {
        let mut applied = false;
        self.tx.send_if_modified(|current| {
            if !current.can_transition_to(&next) {
                return false;
            }
            match &next {
                EngineState::Failed(reason) => {
                    error!(from = %current, reason = %reason, "Bridge engine failed")
                }
                _ => info!(from = %current, to = %next, "Bridge engine state change"),
            }
            *current = next.clone();
            applied = true;
            true
        });
        if !applied {
            warn!(from = %self.get(), to = %next, "Ignoring invalid engine state transition");
        }
        applied
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

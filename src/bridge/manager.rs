//! Connection manager
//!
//! Owns the broker session once the bridge has started. The run loop sleeps
//! on the outbound queue's wake signal and on session loss; each wake either
//! drains the queue to empty or, once stop was requested, closes the session.

use super::queue::OutboundQueue;
use super::state::{EngineState, StateCell};
use crate::error::{BridgeError, BridgeResult};
use crate::observability::BridgeMetrics;
use crate::protocol::codec::encode_downlink;
use crate::protocol::topics::{downlink_push_topic, SUBSCRIBE_ALL};
use crate::protocol::OutboundItem;
use crate::transport::mqtt::MqttError;
use crate::transport::{BrokerSession, InboundPublish};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};

/// State shared between the controller, its handles and the worker
#[derive(Debug, Default)]
pub struct EngineContext {
    pub queue: OutboundQueue,
    pub stop: AtomicBool,
    pub state: StateCell,
    pub metrics: Arc<BridgeMetrics>,
}

impl EngineContext {
    pub fn new(metrics: Arc<BridgeMetrics>) -> Self {
        Self {
            queue: OutboundQueue::new(),
            stop: AtomicBool::new(false),
            state: StateCell::new(),
            metrics,
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Result of one drain cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub sent: usize,
    pub failed: usize,
}

pub struct ConnectionManager<S: BrokerSession> {
    session: S,
    user_id: String,
    ctx: Arc<EngineContext>,
}

impl<S: BrokerSession> ConnectionManager<S> {
    pub fn new(session: S, user_id: impl Into<String>, ctx: Arc<EngineContext>) -> Self {
        Self {
            session,
            user_id: user_id.into(),
            ctx,
        }
    }

    /// Connect, wait for the broker's acknowledgement and subscribe to `#`.
    /// The engine is `Running` only if all of that succeeded.
    pub async fn connect(
        &mut self,
        inbound: mpsc::Sender<InboundPublish>,
    ) -> Result<(), MqttError> {
        self.ctx.state.transition(EngineState::Connecting);

        let result = match self.session.connect(inbound).await {
            Ok(()) => self.session.subscribe(SUBSCRIBE_ALL).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.ctx.state.transition(EngineState::Running);
                Ok(())
            }
            Err(e) => {
                self.ctx.state.transition(EngineState::Failed(e.to_string()));
                if let Err(close_err) = self.session.disconnect().await {
                    debug!(error = %close_err, "Cleanup after failed connect also failed");
                }
                Err(e)
            }
        }
    }

    /// Worker loop. Returns `Ok` after a requested stop and the connection
    /// error if the session is lost while running.
    pub async fn run(mut self) -> BridgeResult<()> {
        loop {
            let lost = tokio::select! {
                biased;
                _ = self.ctx.queue.wait() => None,
                lost = self.session.closed() => Some(lost),
            };

            if let Some(err) = lost {
                self.ctx.state.transition(EngineState::Failed(err.to_string()));
                self.discard_pending().await;
                return Err(BridgeError::Connection(err));
            }

            if self.ctx.stop_requested() {
                self.shutdown().await;
                return Ok(());
            }

            self.drain_cycle().await;
        }
    }

    /// Drain the queue to empty and publish every item in FIFO order.
    /// A failed item is logged and counted; the rest of the batch still goes out.
    pub async fn drain_cycle(&self) -> DrainReport {
        let span = crate::drain_span!(user_id = %self.user_id);
        async {
            let mut report = DrainReport::default();
            loop {
                let batch = self.ctx.queue.drain_all().await;
                if batch.is_empty() {
                    break;
                }
                for item in batch {
                    if self.send_item(&item).await {
                        report.sent += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }

            self.ctx.metrics.drain_cycle();
            if report.sent + report.failed > 0 {
                debug!(sent = report.sent, failed = report.failed, "Drain cycle complete");
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn send_item(&self, item: &OutboundItem) -> bool {
        let payload = match encode_downlink(item.payload()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(device_id = %item.device_id(), error = %e, "Failed to encode downlink");
                self.ctx.metrics.downlink_failed();
                return false;
            }
        };

        let topic = downlink_push_topic(&self.user_id, item.device_id());
        match self.session.publish(&topic, payload).await {
            Ok(()) => {
                debug!(topic = %topic, bytes = item.payload().len(), "Downlink published");
                self.ctx.metrics.downlink_sent();
                true
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "Failed to publish downlink");
                self.ctx.metrics.downlink_failed();
                false
            }
        }
    }

    async fn shutdown(&mut self) {
        self.ctx.state.transition(EngineState::Stopping);
        self.discard_pending().await;

        if let Err(e) = self.session.disconnect().await {
            warn!(error = %e, "Error while disconnecting from broker");
        }

        self.ctx.state.transition(EngineState::Stopped);
        info!("Bridge stopped");
    }

    async fn discard_pending(&self) {
        let dropped = self.ctx.queue.drain_all().await;
        if !dropped.is_empty() {
            warn!(count = dropped.len(), "Dropping undelivered downlinks");
            self.ctx.metrics.downlinks_dropped(dropped.len() as u64);
        }
    }
}

//! Lifecycle controller
//!
//! [`Bridge`] is the public face of the engine: register handlers, start the
//! session, publish downlinks, stop. After `start()` two tasks run: the
//! worker, which owns the broker session, and the dispatcher, which feeds
//! inbound publishes to the handlers in arrival order.

use super::dispatch::{DispatchHub, MessageHandler};
use super::manager::{ConnectionManager, EngineContext};
use super::state::EngineState;
use crate::config::BrokerParams;
use crate::error::{BridgeError, BridgeResult};
use crate::observability::{BridgeMetrics, MetricsSnapshot};
use crate::protocol::topics::validate_topic_level;
use crate::protocol::OutboundItem;
use crate::transport::mqtt::{MqttError, MqttSession};
use crate::transport::BrokerSession;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the channel between the session and the dispatcher
const INBOUND_CAPACITY: usize = 100;

/// Cloneable handle for publishing and stopping from other tasks
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    ctx: Arc<EngineContext>,
}

impl BridgeHandle {
    /// Queue `payload` as a downlink to `device_id`.
    ///
    /// Only an invalid device id is rejected; the item is otherwise always
    /// queued and sent on the next drain cycle.
    pub async fn publish(&self, device_id: &str, payload: &[u8]) -> BridgeResult<()> {
        validate_topic_level(device_id)?;

        if self.ctx.stop_requested() {
            debug!(device_id, "Bridge is stopping, downlink will not be delivered");
        }
        self.ctx
            .queue
            .enqueue(OutboundItem::new(device_id, payload))
            .await;
        self.ctx.metrics.downlink_queued();
        Ok(())
    }

    /// Request shutdown. Idempotent; the worker exits on its next wake-up.
    pub fn stop(&self) {
        if !self.ctx.stop.swap(true, Ordering::SeqCst) {
            info!("Bridge stop requested");
        }
        self.ctx.queue.wake();
    }

    pub fn state(&self) -> EngineState {
        self.ctx.state.get()
    }

    /// Watch state changes, e.g. to react to a lost connection
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.ctx.state.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }
}

/// Bridge between a TTN application's MQTT feed and local handlers
pub struct Bridge<S: BrokerSession = MqttSession> {
    params: BrokerParams,
    session: Option<S>,
    handle: BridgeHandle,
    hub: Arc<DispatchHub>,
    worker: Option<JoinHandle<BridgeResult<()>>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Bridge<MqttSession> {
    /// Bridge backed by a rumqttc session for `params`
    pub fn mqtt(params: BrokerParams) -> BridgeResult<Self> {
        params.validate()?;
        let session = MqttSession::new(&params)?;
        Self::new(params, session)
    }
}

impl<S: BrokerSession> Bridge<S> {
    /// Validate `params` and wrap `session`. Nothing connects until `start()`.
    pub fn new(params: BrokerParams, session: S) -> BridgeResult<Self> {
        params.validate()?;

        let metrics = Arc::new(BridgeMetrics::new());
        let ctx = Arc::new(EngineContext::new(metrics.clone()));

        Ok(Self {
            params,
            session: Some(session),
            handle: BridgeHandle { ctx },
            hub: Arc::new(DispatchHub::new(metrics)),
            worker: None,
            dispatcher: None,
        })
    }

    /// Register a handler for decoded uplinks. Handlers should be registered
    /// before `start()`; later registrations apply from the next message on.
    pub fn on_message<H: MessageHandler>(&self, handler: H) {
        if self.state() != EngineState::Idle {
            warn!(state = %self.state(), "Handler registered after start");
        }
        self.hub.register(Arc::new(handler));
    }

    /// Connect, subscribe and spawn the worker and dispatcher tasks.
    ///
    /// Returns once the bridge is running, with the connection error if the
    /// broker could not be reached or refused the session.
    pub async fn start(&mut self) -> BridgeResult<()> {
        let Some(session) = self.session.take() else {
            return Err(BridgeError::AlreadyStarted);
        };
        let ctx = self.handle.ctx.clone();

        if ctx.stop_requested() {
            info!("Stop requested before start, not connecting");
            ctx.state.transition(EngineState::Stopped);
            return Ok(());
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        self.dispatcher = Some(tokio::spawn(self.hub.clone().run(inbound_rx)));

        let mut manager = ConnectionManager::new(session, self.params.user_id.clone(), ctx);
        manager.connect(inbound_tx).await?;

        info!(host = %self.params.host(), user_id = %self.params.user_id, "Bridge running");
        self.worker = Some(tokio::spawn(manager.run()));
        Ok(())
    }

    /// Queue a downlink; see [`BridgeHandle::publish`]
    pub async fn publish(&self, device_id: &str, payload: &[u8]) -> BridgeResult<()> {
        self.handle.publish(device_id, payload).await
    }

    /// Request shutdown; see [`BridgeHandle::stop`]
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Wait for the worker to finish and return how it ended.
    ///
    /// Returns immediately if the bridge never started or was already joined.
    pub async fn join(&mut self) -> BridgeResult<()> {
        let Some(worker) = self.worker.take() else {
            return match self.state() {
                EngineState::Failed(reason) => {
                    Err(BridgeError::Connection(MqttError::ConnectionLost(reason)))
                }
                _ => Ok(()),
            };
        };

        worker
            .await
            .map_err(|e| BridgeError::internal(format!("Bridge worker task failed: {e}")))?
    }

    pub fn handle(&self) -> BridgeHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> EngineState {
        self.handle.state()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.handle.metrics()
    }

    pub fn params(&self) -> &BrokerParams {
        &self.params
    }
}

impl<S: BrokerSession> Drop for Bridge<S> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.handle.stop();
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
    }
}

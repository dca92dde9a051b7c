//! Dispatch hub
//!
//! Decodes each inbound publish into a [`Message`] and hands it to every
//! registered handler, one after another, in registration order. A handler
//! that fails or panics is logged and skipped; it stays registered and the
//! handlers after it still run.

use crate::observability::BridgeMetrics;
use crate::protocol::codec::{decode_uplink, CodecError};
use crate::protocol::Message;
use crate::transport::InboundPublish;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, warn, Instrument};

/// Error type handlers report failures with
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives decoded uplinks
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

/// Adapter returned by [`handler_fn`]
pub struct FnHandler<F> {
    f: F,
}

/// Wrap a synchronous closure as a [`MessageHandler`]
///
/// ```rust
/// use ttn_bridge::bridge::handler_fn;
///
/// let handler = handler_fn(|message| {
///     println!("{} bytes", message.decoded_payload().map_or(0, <[u8]>::len));
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        (self.f)(message)
    }
}

/// What happened to one inbound publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every registered handler was invoked; `failures` of them failed or panicked
    Delivered { handlers: usize, failures: usize },
    /// Nothing was registered, the message was dropped
    NoHandlers,
    /// The decoded payload was invalid, the message was dropped
    Rejected,
}

pub struct DispatchHub {
    handlers: RwLock<Vec<Arc<dyn MessageHandler>>>,
    metrics: Arc<BridgeMetrics>,
}

impl DispatchHub {
    pub fn new(metrics: Arc<BridgeMetrics>) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            metrics,
        }
    }

    pub fn register(&self, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Handlers are invoked outside the lock, over a copy of the registry
    fn snapshot(&self) -> Vec<Arc<dyn MessageHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Decode one publish and deliver it. An empty payload counts as absent.
    pub async fn dispatch(&self, topic: &str, raw_payload: Option<&[u8]>) -> DispatchOutcome {
        self.dispatch_inner(topic, raw_payload)
            .instrument(crate::dispatch_span!(topic = %topic))
            .await
    }

    async fn dispatch_inner(&self, topic: &str, raw_payload: Option<&[u8]>) -> DispatchOutcome {
        self.metrics.uplink_received();
        let raw_payload = raw_payload.filter(|payload| !payload.is_empty());

        let decoded_payload = match raw_payload.map(decode_uplink).transpose() {
            Ok(decoded) => decoded.flatten(),
            Err(CodecError::Malformed(e)) => {
                debug!(
                    error = %e,
                    "Payload is not a JSON envelope, delivering without decoded bytes"
                );
                None
            }
            Err(e) => {
                warn!(error = %e, "Dropping uplink with invalid decoded payload");
                self.metrics.uplink_rejected();
                return DispatchOutcome::Rejected;
            }
        };

        let handlers = self.snapshot();
        if handlers.is_empty() {
            debug!("No handlers registered, dropping message");
            return DispatchOutcome::NoHandlers;
        }

        let message = Message::new(topic, decoded_payload, raw_payload.map(<[u8]>::to_vec));
        let mut failures = 0;

        for (index, handler) in handlers.iter().enumerate() {
            match AssertUnwindSafe(handler.handle(&message))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    self.metrics.handler_failed();
                    warn!(handler = index, error = %e, "Message handler failed");
                }
                Err(panic) => {
                    failures += 1;
                    self.metrics.handler_failed();
                    error!(
                        handler = index,
                        panic = %panic_message(&*panic),
                        "Message handler panicked"
                    );
                }
            }
        }

        self.metrics.uplink_dispatched();
        DispatchOutcome::Delivered {
            handlers: handlers.len(),
            failures,
        }
    }

    /// Consume inbound publishes in arrival order until every sender is gone
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundPublish>) {
        while let Some(publish) = inbound.recv().await {
            self.dispatch(&publish.topic, publish.payload.as_deref())
                .await;
        }
        debug!("Inbound channel closed, dispatch task exiting");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const TOPIC: &str = "v3/test-app@ttn/devices/dev1/up";

    fn hub() -> DispatchHub {
        DispatchHub::new(Arc::new(BridgeMetrics::new()))
    }

    fn recorder(seen: Arc<Mutex<Vec<Message>>>) -> Arc<dyn MessageHandler> {
        Arc::new(handler_fn(move |message| {
            seen.lock().unwrap().push(message.clone());
            Ok(())
        }))
    }

    #[tokio::test]
    async fn test_decoded_payload_delivered() {
        let hub = hub();
        let seen = Arc::new(Mutex::new(Vec::new()));
        hub.register(recorder(seen.clone()));

        let raw = br#"{"uplink_message":{"decoded_payload":{"bytes":[72,105]}}}"#;
        let outcome = hub.dispatch(TOPIC, Some(raw)).await;

        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                handlers: 1,
                failures: 0
            }
        );
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].topic(), TOPIC);
        assert_eq!(seen[0].decoded_payload(), Some(&b"Hi"[..]));
        assert_eq!(seen[0].raw_payload(), Some(&raw[..]));
    }

    #[tokio::test]
    async fn test_malformed_json_still_delivered() {
        let hub = hub();
        let seen = Arc::new(Mutex::new(Vec::new()));
        hub.register(recorder(seen.clone()));

        hub.dispatch(TOPIC, Some(b"not json")).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].decoded_payload(), None);
        assert_eq!(seen[0].raw_payload(), Some(&b"not json"[..]));
    }

    #[tokio::test]
    async fn test_empty_payload_is_absent() {
        let hub = hub();
        let seen = Arc::new(Mutex::new(Vec::new()));
        hub.register(recorder(seen.clone()));

        hub.dispatch(TOPIC, Some(b"")).await;
        hub.dispatch(TOPIC, None).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen
            .iter()
            .all(|m| m.raw_payload().is_none() && m.decoded_payload().is_none()));
    }

    #[tokio::test]
    async fn test_out_of_range_rejected() {
        let metrics = Arc::new(BridgeMetrics::new());
        let hub = DispatchHub::new(metrics.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        hub.register(recorder(seen.clone()));

        let raw = br#"{"uplink_message":{"decoded_payload":{"bytes":[1,300]}}}"#;
        assert_eq!(hub.dispatch(TOPIC, Some(raw)).await, DispatchOutcome::Rejected);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(metrics.snapshot().uplinks.rejected, 1);
    }

    #[tokio::test]
    async fn test_no_handlers() {
        let hub = hub();
        assert_eq!(
            hub.dispatch(TOPIC, Some(b"{}")).await,
            DispatchOutcome::NoHandlers
        );
    }

    #[tokio::test]
    async fn test_failing_and_panicking_handlers_are_isolated() {
        let metrics = Arc::new(BridgeMetrics::new());
        let hub = DispatchHub::new(metrics.clone());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = order.clone();
        hub.register(Arc::new(handler_fn(move |_| {
            first.lock().unwrap().push("first");
            Err("boom".into())
        })));
        hub.register(Arc::new(handler_fn(|_| panic!("handler bug"))));
        let last = order.clone();
        hub.register(Arc::new(handler_fn(move |_| {
            last.lock().unwrap().push("last");
            Ok(())
        })));

        for _ in 0..2 {
            assert_eq!(
                hub.dispatch(TOPIC, Some(b"{}")).await,
                DispatchOutcome::Delivered {
                    handlers: 3,
                    failures: 2
                }
            );
        }

        assert_eq!(*order.lock().unwrap(), vec!["first", "last", "first", "last"]);
        assert_eq!(hub.handler_count(), 3);
        assert_eq!(metrics.snapshot().uplinks.handler_failures, 4);
    }

    #[tokio::test]
    async fn test_run_preserves_arrival_order() {
        let hub = Arc::new(hub());
        let seen = Arc::new(Mutex::new(Vec::new()));
        hub.register(recorder(seen.clone()));

        let (tx, rx) = mpsc::channel(8);
        for n in 0..5 {
            tx.send(InboundPublish::new(format!("v3/a@ttn/devices/d{n}/up"), b"{}"))
                .await
                .unwrap();
        }
        drop(tx);
        hub.clone().run(rx).await;

        let topics: Vec<String> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.topic().to_string())
            .collect();
        let expected: Vec<String> = (0..5).map(|n| format!("v3/a@ttn/devices/d{n}/up")).collect();
        assert_eq!(topics, expected);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }
}

//! # Notifier
//!
//! The publish/subscribe contract a node relies on, plus a notifier backed by
//! the in-memory broker.
//!
//! ## Delivery Semantics
//!
//! At-least-once, unordered across publishers. Consumers must tolerate
//! duplicates and replays; the commit core absorbs them as no-op votes.

use crate::publisher::{Delivery, InMemoryBroker};
use crate::subscriber::Subscription;
use crate::topic::{default_binding, routing_key};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Transport-level errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The notifier was closed; nothing more can be emitted.
    #[error("Notifier closed")]
    Closed,

    /// `consume()` was already called on this notifier.
    #[error("Notifier is already consuming")]
    AlreadyConsuming,

    /// The installed handler refused a delivery.
    #[error("Message rejected: {0}")]
    Rejected(String),

    /// Publishing failed in the underlying transport.
    #[error("Publish failed: {0}")]
    PublishFailed(String),
}

/// Receives inbound deliveries on behalf of a node.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one delivery. An error drops the message.
    async fn handle(&self, delivery: &Delivery) -> Result<(), BusError>;
}

/// Publish/subscribe channel used by a node.
///
/// Implementations must be safe to share between tasks.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Best-effort broadcast of one encoded message.
    async fn emit(&self, message: Vec<u8>) -> Result<(), BusError>;

    /// Hand one inbound delivery to the node's handler.
    async fn receive(&self, delivery: Delivery) -> Result<(), BusError>;

    /// Release transport resources. Safe to call more than once.
    async fn close(&self) -> Result<(), BusError>;
}

/// Queue and routing settings for a [`BusNotifier`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Queue name, used in logs.
    pub queue: String,
    /// Routing key prefix shared by every node of the cluster.
    pub prefix: String,
    /// Routing key suffix for messages emitted by this node.
    pub key: String,
    /// Explicit binding pattern; defaults to `"<prefix>.*"`.
    pub binding: Option<String>,
}

impl NotifierConfig {
    pub fn new(queue: impl Into<String>, prefix: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            prefix: prefix.into(),
            key: key.into(),
            binding: None,
        }
    }

    /// Routing key of messages emitted with this config.
    #[must_use]
    pub fn routing_key(&self) -> String {
        routing_key(&self.prefix, &self.key)
    }

    /// Binding pattern of the queue.
    #[must_use]
    pub fn binding(&self) -> String {
        self.binding
            .clone()
            .unwrap_or_else(|| default_binding(&self.prefix))
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self::new("commits", "commits", "signal")
    }
}

/// Notifier publishing to and consuming from an [`InMemoryBroker`].
///
/// The queue is bound when the notifier is created, so messages published
/// before [`consume`](BusNotifier::consume) starts are buffered rather than
/// lost.
pub struct BusNotifier {
    broker: Arc<InMemoryBroker>,
    config: NotifierConfig,
    routing_key: String,
    queue: Mutex<Option<Subscription>>,
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl BusNotifier {
    /// Bind a queue on `broker` according to `config`.
    pub fn new(broker: Arc<InMemoryBroker>, config: NotifierConfig) -> Self {
        let queue = broker.subscribe(config.binding());
        let routing_key = config.routing_key();

        debug!(
            queue = %config.queue,
            binding = %queue.binding(),
            routing_key = %routing_key,
            "Queue bound"
        );

        Self {
            broker,
            config,
            routing_key,
            queue: Mutex::new(Some(queue)),
            handler: RwLock::new(None),
            consumer: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Install the handler invoked for each delivery. Replaces any previous one.
    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.handler.write() = Some(handler);
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Start the delivery loop on the current tokio runtime.
    ///
    /// Handler errors are logged and the offending message dropped; the loop
    /// keeps running until the notifier is closed or the broker is dropped.
    pub fn consume(self: &Arc<Self>) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let mut queue = self.queue.lock().take().ok_or(BusError::AlreadyConsuming)?;

        let notifier: Weak<Self> = Arc::downgrade(self);
        let queue_name = self.config.queue.clone();
        let handle = tokio::spawn(async move {
            while let Some(delivery) = queue.recv().await {
                let Some(notifier) = notifier.upgrade() else {
                    break;
                };
                if let Err(e) = notifier.receive(delivery).await {
                    warn!(queue = %queue_name, error = %e, "Dropping message");
                }
            }
            debug!(queue = %queue_name, "Delivery loop stopped");
        });

        *self.consumer.lock() = Some(handle);
        info!(queue = %self.config.queue, "Consuming messages");
        Ok(())
    }
}

#[async_trait]
impl Notifier for BusNotifier {
    async fn emit(&self, message: Vec<u8>) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        self.broker.publish(&self.routing_key, message);
        Ok(())
    }

    async fn receive(&self, delivery: Delivery) -> Result<(), BusError> {
        if self.is_closed() {
            return Ok(());
        }
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler.handle(&delivery).await,
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), BusError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // The delivery loop owns the bound queue; wait for it to drop.
        let consumer = self.consumer.lock().take();
        if let Some(handle) = consumer {
            handle.abort();
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!(queue = %self.config.queue, "Delivery loop panicked");
                }
            }
        }
        self.queue.lock().take();
        // The handler usually holds the node that owns this notifier.
        self.handler.write().take();
        info!(queue = %self.config.queue, "Notifier closed");
        Ok(())
    }
}

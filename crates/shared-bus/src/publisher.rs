//! # Message Broker
//!
//! Defines the publishing side of the bus: an in-memory topic exchange.

use crate::subscriber::Subscription;
use crate::DEFAULT_CHANNEL_CAPACITY;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// One message as delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Routing key the message was published under.
    pub routing_key: String,
    /// Encoded message body.
    pub body: Vec<u8>,
}

impl Delivery {
    pub fn new(routing_key: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            routing_key: routing_key.into(),
            body,
        }
    }
}

/// In-memory implementation of a topic exchange.
///
/// Uses `tokio::sync::broadcast` for multi-producer, multi-consumer fan-out;
/// each [`Subscription`] filters by its binding pattern. Suitable for a
/// single process hosting several nodes; distributed deployments put a real
/// broker behind the [`Notifier`](crate::Notifier) contract instead.
pub struct InMemoryBroker {
    /// Broadcast sender for deliveries.
    sender: broadcast::Sender<Delivery>,

    /// Active subscription count by binding pattern.
    bindings: Arc<RwLock<HashMap<String, usize>>>,

    /// Total messages published.
    messages_published: AtomicU64,

    /// Channel capacity.
    capacity: usize,
}

impl InMemoryBroker {
    /// Create a new broker with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new broker with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            bindings: Arc::new(RwLock::new(HashMap::new())),
            messages_published: AtomicU64::new(0),
            capacity,
        }
    }

    /// Bind a new queue to the exchange.
    ///
    /// Only messages published after this call are delivered to it.
    #[must_use]
    pub fn subscribe(&self, binding: impl Into<String>) -> Subscription {
        let binding = binding.into();
        let receiver = self.sender.subscribe();

        if let Ok(mut bindings) = self.bindings.write() {
            *bindings.entry(binding.clone()).or_insert(0) += 1;
        }

        debug!(binding = %binding, "New subscription created");

        Subscription::new(receiver, binding, self.bindings.clone())
    }

    /// Publish a message body under `routing_key`.
    ///
    /// Returns the number of subscriptions the message was handed to. The
    /// count includes queues whose binding does not match; they drop it on
    /// receive.
    pub fn publish(&self, routing_key: &str, body: Vec<u8>) -> usize {
        self.messages_published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(Delivery::new(routing_key, body)) {
            Ok(receiver_count) => {
                debug!(
                    routing_key = routing_key,
                    receivers = receiver_count,
                    "Message published"
                );
                receiver_count
            }
            Err(e) => {
                warn!(
                    routing_key = routing_key,
                    error = %e,
                    "Message dropped (no receivers)"
                );
                0
            }
        }
    }

    /// Get the total number of messages published.
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    /// Get the number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get the number of active subscriptions for one binding pattern.
    #[must_use]
    pub fn binding_count(&self, binding: &str) -> usize {
        self.bindings
            .read()
            .map(|b| b.get(binding).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Get the channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

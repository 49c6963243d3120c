//! # Subscriptions
//!
//! Defines the consuming side of the bus: a queue bound to the exchange
//! with a topic pattern.

use crate::publisher::Delivery;
use crate::topic::topic_matches;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The broker was dropped.
    #[error("Message broker closed")]
    Closed,
}

/// A bound queue for receiving deliveries.
///
/// When dropped, the binding is automatically cleaned up.
pub struct Subscription {
    /// The broadcast receiver.
    receiver: broadcast::Receiver<Delivery>,

    /// Binding pattern for this subscription.
    binding: String,

    /// Reference to binding tracking (for cleanup).
    bindings: Arc<RwLock<HashMap<String, usize>>>,
}

impl Subscription {
    pub(crate) fn new(
        receiver: broadcast::Receiver<Delivery>,
        binding: String,
        bindings: Arc<RwLock<HashMap<String, usize>>>,
    ) -> Self {
        Self {
            receiver,
            binding,
            bindings,
        }
    }

    /// Receive the next delivery whose routing key matches the binding.
    ///
    /// # Returns
    ///
    /// - `Some(delivery)` - The next matching delivery
    /// - `None` - The channel was closed (broker dropped)
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            let delivery = match self.receiver.recv().await {
                Ok(d) => d,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(
                        binding = %self.binding,
                        lagged = count,
                        "Subscriber lagged, some messages dropped"
                    );
                    continue;
                }
            };

            if topic_matches(&self.binding, &delivery.routing_key) {
                return Some(delivery);
            }
        }
    }

    /// Try to receive the next matching delivery without blocking.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(delivery))` - A delivery was available and matched
    /// - `Ok(None)` - No delivery available (would block)
    /// - `Err(SubscriptionError::Closed)` - The channel was closed
    pub fn try_recv(&mut self) -> Result<Option<Delivery>, SubscriptionError> {
        loop {
            let delivery = match self.receiver.try_recv() {
                Ok(d) => d,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(
                        binding = %self.binding,
                        lagged = count,
                        "Subscriber lagged, some messages dropped"
                    );
                    continue;
                }
            };

            if topic_matches(&self.binding, &delivery.routing_key) {
                return Ok(Some(delivery));
            }
        }
    }

    /// Get the binding pattern for this subscription.
    #[must_use]
    pub fn binding(&self) -> &str {
        &self.binding
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Ok(mut bindings) = self.bindings.write() else {
            return;
        };
        let Some(count) = bindings.get_mut(&self.binding) else {
            debug!(binding = %self.binding, "Subscription dropped");
            return;
        };

        *count = count.saturating_sub(1);
        if *count == 0 {
            bindings.remove(&self.binding);
        }
        debug!(binding = %self.binding, "Subscription dropped");
    }
}

//! # Shared Bus - Message Transport for Commit Coordination
//!
//! Carries the wire messages of the two-phase commit protocol between nodes.
//!
//! ## Topic Exchange
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │   Node A     │                    │   Node B     │
//! │              │  emit()            │              │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │    Broker    │          │
//!                  │ prefix.key   │ ─────────┘
//!                  └──────────────┘  queue bound to prefix.*
//! ```
//!
//! ## Contract
//!
//! - The commit core only sees [`Notifier`] and [`MessageHandler`].
//! - Delivery is at-least-once and unordered across publishers.
//! - Messages are validated by [`CommitMessage::decode`] before use.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod message;
pub mod notifier;
pub mod publisher;
pub mod subscriber;
pub mod topic;

// Re-export main types
pub use message::{wire_timeout, CommitMessage, MessageError, MessageKind, Signal};
pub use notifier::{BusError, BusNotifier, MessageHandler, Notifier, NotifierConfig};
pub use publisher::{Delivery, InMemoryBroker};
pub use subscriber::{Subscription, SubscriptionError};
pub use topic::{default_binding, routing_key, topic_matches};

/// Maximum messages to buffer per queue before slow consumers lag.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

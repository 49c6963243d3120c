//! Driven ports: what a node needs from its surroundings.
//!
//! Transport goes through [`shared_bus::Notifier`]; the local vote on an
//! incoming prepare comes from a [`ParticipantVoter`].

use crate::domain::Commit;
use async_trait::async_trait;

pub use shared_bus::Notifier;

/// The application's vote on a prepared transaction.
#[async_trait]
pub trait ParticipantVoter: Send + Sync {
    /// `Some(ok)` to reply, `None` to stay silent and let the deadline decide.
    async fn vote(&self, commit: &Commit) -> Option<bool>;
}

/// Mock implementations for testing
#[cfg(test)]
pub mod mocks {
    use super::*;
    use parking_lot::Mutex;
    use shared_bus::{BusError, CommitMessage, Delivery};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records emitted messages instead of sending them.
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<Vec<u8>>>,
        fail: AtomicBool,
        closed: AtomicBool,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every following `emit` fail.
        pub fn fail_emits(&self) {
            self.fail.store(true, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<CommitMessage> {
            self.sent
                .lock()
                .iter()
                .map(|body| CommitMessage::decode(body).expect("recorded message decodes"))
                .collect()
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn emit(&self, message: Vec<u8>) -> Result<(), BusError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(BusError::PublishFailed("connection refused".to_string()));
            }
            self.sent.lock().push(message);
            Ok(())
        }

        async fn receive(&self, _delivery: Delivery) -> Result<(), BusError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), BusError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Always answers with the same vote.
    pub struct StaticVoter(pub Option<bool>);

    #[async_trait]
    impl ParticipantVoter for StaticVoter {
        async fn vote(&self, _commit: &Commit) -> Option<bool> {
            self.0
        }
    }
}

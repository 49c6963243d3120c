//! Participant reply policy of the demo cluster.

use async_trait::async_trait;
use std::time::Duration;
use tpc_commit::{Commit, ParticipantVoter};
use tracing::debug;

/// Answers every prepare with a fixed vote after a fixed delay.
#[derive(Debug, Clone)]
pub struct DelayedVoter {
    delay: Duration,
    vote: Option<bool>,
}

impl DelayedVoter {
    /// Vote `true` after `delay`.
    pub fn affirmative(delay: Duration) -> Self {
        Self {
            delay,
            vote: Some(true),
        }
    }

    /// Never reply.
    pub fn silent() -> Self {
        Self {
            delay: Duration::ZERO,
            vote: None,
        }
    }

    pub fn new(delay: Duration, vote: Option<bool>) -> Self {
        Self { delay, vote }
    }
}

#[async_trait]
impl ParticipantVoter for DelayedVoter {
    async fn vote(&self, commit: &Commit) -> Option<bool> {
        let vote = self.vote?;
        tokio::time::sleep(self.delay).await;
        debug!(commit_id = %commit.id(), vote, "Replying to prepare");
        Some(vote)
    }
}

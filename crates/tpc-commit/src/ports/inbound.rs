//! Driving port: transaction lifecycle operations of a node.

use crate::domain::Commit;
use crate::error::CommitResult;
use async_trait::async_trait;
use shared_types::{Address, CommitId};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle API of a two-phase commit node.
#[async_trait]
pub trait CommitApi: Send + Sync {
    /// Register a coordinator-side commit, then broadcast the prepare.
    ///
    /// Registration happens before the broadcast, so a reply racing the
    /// prepare always finds the commit.
    async fn prepare(
        &self,
        id: CommitId,
        participants: Vec<Address>,
        timeout: Duration,
    ) -> CommitResult<Arc<Commit>>;

    /// Broadcast this node's own vote.
    async fn done(&self, id: CommitId, ok: bool) -> CommitResult<()>;

    /// Broadcast a negative vote on behalf of `participant`.
    async fn abort(&self, id: CommitId, participant: Address) -> CommitResult<()>;

    /// Deregister and tear down one commit. Returns `false` if absent.
    fn close_commit(&self, id: &CommitId) -> bool;
}

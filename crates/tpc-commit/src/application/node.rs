//! # Node
//!
//! Process-local coordinator and participant. Owns one [`Commit`] per
//! transaction id, turns lifecycle calls into wire messages, and retires
//! finished commits.
//!
//! ## Registry
//!
//! The registry is a `DashMap` keyed by [`CommitId`]. Creation goes through
//! the map's entry API, so concurrent first deliveries of one prepare leave
//! exactly one live commit. The idle timer is armed only by the insert that
//! wins.
//!
//! Retired ids are remembered for `retired_ttl_ms` so that a replayed
//! prepare is dropped instead of starting a second voting round.

use crate::config::NodeConfig;
use crate::domain::{Commit, FailureDetector, RetiredCommits};
use crate::error::CommitResult;
use crate::ports::inbound::CommitApi;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shared_bus::{wire_timeout, CommitMessage, Notifier};
use shared_types::{Address, CommitId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Node {
    address: Address,
    config: NodeConfig,
    commits: DashMap<CommitId, Arc<Commit>>,
    retired: RetiredCommits,
    notifier: Arc<dyn Notifier>,
    detectors: Vec<Arc<dyn FailureDetector>>,
}

impl Node {
    pub fn new(address: impl Into<Address>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_config(address, notifier, NodeConfig::default())
    }

    pub fn with_config(
        address: impl Into<Address>,
        notifier: Arc<dyn Notifier>,
        config: NodeConfig,
    ) -> Self {
        Self {
            address: address.into(),
            retired: RetiredCommits::new(config.retired_ttl()),
            config,
            commits: DashMap::new(),
            notifier,
            detectors: Vec::new(),
        }
    }

    /// Attach a failure detector.
    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn FailureDetector>) -> Self {
        self.detectors.push(detector);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn detectors(&self) -> &[Arc<dyn FailureDetector>] {
        &self.detectors
    }

    /// Number of commits currently registered.
    pub fn commit_count(&self) -> usize {
        self.commits.len()
    }

    /// Get the commit for `id`, creating and registering it if absent.
    ///
    /// When a commit already exists the arguments are discarded and the
    /// existing instance returned.
    pub fn new_commit(
        &self,
        id: CommitId,
        host: impl Into<Address>,
        participants: Vec<Address>,
        timeout: Duration,
    ) -> Arc<Commit> {
        if let Some(existing) = self.get_commit(&id) {
            return existing;
        }
        let candidate = Arc::new(Commit::new(id, host, participants, timeout));
        match self.commits.entry(id) {
            Entry::Occupied(slot) => Arc::clone(slot.get()),
            Entry::Vacant(slot) => {
                self.arm(&candidate);
                slot.insert(Arc::clone(&candidate));
                candidate
            }
        }
    }

    /// Register `commit` unless one with the same id exists.
    ///
    /// Returns `true` if it was inserted; the idle timer is armed then.
    pub fn register_commit(&self, commit: Arc<Commit>) -> bool {
        match self.commits.entry(commit.id()) {
            Entry::Occupied(_) => {
                debug!(commit_id = %commit.id(), "Commit already registered, keeping existing");
                false
            }
            Entry::Vacant(slot) => {
                self.arm(&commit);
                slot.insert(commit);
                true
            }
        }
    }

    pub fn get_commit(&self, id: &CommitId) -> Option<Arc<Commit>> {
        self.commits.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `id` was retired recently enough that its messages are stale.
    pub fn is_retired(&self, id: &CommitId) -> bool {
        self.retired.contains(id)
    }

    fn arm(&self, commit: &Arc<Commit>) {
        let idle = commit.timeout().unwrap_or_else(|| self.config.idle_timeout());
        commit.start_idle_timer(idle);
        debug!(
            node = %self.address,
            commit_id = %commit.id(),
            host = commit.host(),
            "Commit registered"
        );
    }

    /// Watch `commit` with every attached detector.
    ///
    /// Each report turns into one abort vote per silent participant.
    /// Returns the number of detectors that armed.
    pub fn attach_detectors(self: &Arc<Self>, commit: &Arc<Commit>) -> usize {
        if !self.config.detect_failures {
            return 0;
        }

        let mut armed = 0;
        for detector in &self.detectors {
            let Some(report) = detector.detect(commit) else {
                continue;
            };
            armed += 1;

            let node = Arc::clone(self);
            let id = commit.id();
            tokio::spawn(async move {
                let Ok(missing) = report.await else {
                    return;
                };
                for participant in missing.to_vec() {
                    if let Err(e) = node.abort(id, participant.clone()).await {
                        warn!(
                            commit_id = %id,
                            participant = %participant,
                            error = %e,
                            "Failed to emit abort for silent participant"
                        );
                    }
                }
            });
        }
        armed
    }

    fn host_of(&self, id: &CommitId) -> Address {
        self.get_commit(id)
            .map(|commit| commit.host().to_string())
            .unwrap_or_else(|| self.address.clone())
    }

    async fn emit(&self, message: CommitMessage) -> CommitResult<()> {
        let body = message.encode()?;
        self.notifier.emit(body).await?;
        Ok(())
    }

    /// Retire every commit, stop the detectors and release the notifier.
    pub async fn close(&self) -> CommitResult<()> {
        let ids: Vec<CommitId> = self.commits.iter().map(|entry| *entry.key()).collect();
        for id in &ids {
            self.close_commit(id);
        }
        for detector in &self.detectors {
            detector.close();
        }
        self.notifier.close().await?;
        info!(node = %self.address, retired = ids.len(), "Node closed");
        Ok(())
    }
}

#[async_trait]
impl CommitApi for Node {
    async fn prepare(
        &self,
        id: CommitId,
        participants: Vec<Address>,
        timeout: Duration,
    ) -> CommitResult<Arc<Commit>> {
        let commit = self.new_commit(id, self.address.clone(), participants, wire_timeout(timeout));
        // Announce what is registered, which may predate this call.
        let participants = commit.participants().to_vec();
        let timeout = commit.timeout().unwrap_or_default();
        info!(
            node = %self.address,
            commit_id = %id,
            participants = participants.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Preparing transaction"
        );
        self.emit(CommitMessage::prepare(
            commit.host().to_string(),
            id,
            participants,
            timeout,
        ))
        .await?;
        Ok(commit)
    }

    async fn done(&self, id: CommitId, ok: bool) -> CommitResult<()> {
        debug!(node = %self.address, commit_id = %id, ok, "Voting");
        self.emit(CommitMessage::response(self.host_of(&id), self.address.clone(), id, ok))
            .await
    }

    async fn abort(&self, id: CommitId, participant: Address) -> CommitResult<()> {
        debug!(node = %self.address, commit_id = %id, participant = %participant, "Aborting on behalf of participant");
        self.emit(CommitMessage::response(self.host_of(&id), participant, id, false))
            .await
    }

    fn close_commit(&self, id: &CommitId) -> bool {
        let Some((_, commit)) = self.commits.remove(id) else {
            return false;
        };
        for detector in &self.detectors {
            detector.cancel(id);
        }
        commit.close();
        self.retired.retire(*id);
        debug!(node = %self.address, commit_id = %id, "Commit retired");
        true
    }
}

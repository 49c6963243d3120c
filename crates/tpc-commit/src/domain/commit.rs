//! Per-transaction voting state machine.
//!
//! State Machine:
//! ```text
//! [PENDING] ──vote(p, true), votes == participants──→ [DECIDED(Commit)]
//!     │
//!     ├──vote(p, false)──────────────────────────────→ [DECIDED(Abort)]
//!     ├──idle timer fires────────────────────────────→ [DECIDED(Abort)]
//!     └──close()─────────────────────────────────────→ [DECIDED(Abort)]
//! ```
//!
//! Every transition goes through `CommitState::decide` while the commit's
//! write lock is held. `decide` refuses a second decision and consumes the
//! single outcome sender, so the outcome slot is written at most once no
//! matter which path (vote, timer, close) gets there first.

use crate::domain::outcome::{Outcome, VoteOutcome};
use parking_lot::RwLock;
use shared_types::{Address, CommitId, ParticipantSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// One transaction as observed by one node.
#[derive(Debug)]
pub struct Commit {
    id: CommitId,
    host: Address,
    timeout: Option<Duration>,
    prepare_seen: AtomicBool,
    state: RwLock<CommitState>,
}

#[derive(Debug)]
struct CommitState {
    participants: ParticipantSet,
    votes: ParticipantSet,
    decision: Option<Outcome>,
    closed: bool,
    outcome_tx: Option<oneshot::Sender<Outcome>>,
    outcome_rx: Option<oneshot::Receiver<Outcome>>,
    idle_timer: Option<AbortHandle>,
}

impl CommitState {
    fn is_final(&self) -> bool {
        self.decision.is_some() || self.closed
    }

    /// Record the decision and publish it. Returns `false` if already decided.
    fn decide(&mut self, outcome: Outcome) -> bool {
        if self.is_final() {
            return false;
        }
        self.decision = Some(outcome);
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
        if let Some(tx) = self.outcome_tx.take() {
            // Receiver may already be gone; the decision still stands.
            let _ = tx.send(outcome);
        }
        true
    }
}

impl Commit {
    /// Create a pending commit.
    ///
    /// A zero `timeout` means the transaction carries no deadline of its own.
    pub fn new<I, A>(id: CommitId, host: impl Into<Address>, participants: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Address>,
    {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        Self {
            id,
            host: host.into(),
            timeout: (!timeout.is_zero()).then_some(timeout),
            prepare_seen: AtomicBool::new(false),
            state: RwLock::new(CommitState {
                participants: ParticipantSet::with_members(participants),
                votes: ParticipantSet::new(),
                decision: None,
                closed: false,
                outcome_tx: Some(outcome_tx),
                outcome_rx: Some(outcome_rx),
                idle_timer: None,
            }),
        }
    }

    pub fn id(&self) -> CommitId {
        self.id
    }

    /// Address of the coordinator that started the transaction.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Deadline carried by the prepare message, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Apply one vote.
    ///
    /// Votes from non-participants, repeated votes and votes after the
    /// decision are ignored. A single `false` aborts; the `true` that
    /// completes the participant set commits.
    pub fn vote(&self, participant: &str, ok: bool) -> VoteOutcome {
        let mut state = self.state.write();

        if state.is_final() || !state.participants.has(participant) || state.votes.has(participant)
        {
            debug!(commit_id = %self.id, participant, ok, "Vote ignored");
            return VoteOutcome::Ignored;
        }

        if !ok {
            state.decide(Outcome::Abort);
            info!(commit_id = %self.id, participant, "Participant dissented, aborting");
            return VoteOutcome::Decided(Outcome::Abort);
        }

        state.votes.add(participant);
        if state.votes == state.participants {
            state.decide(Outcome::Commit);
            info!(
                commit_id = %self.id,
                participants = state.participants.len(),
                "Unanimous, committing"
            );
            return VoteOutcome::Decided(Outcome::Commit);
        }

        debug!(
            commit_id = %self.id,
            participant,
            votes = state.votes.len(),
            participants = state.participants.len(),
            "Vote recorded"
        );
        VoteOutcome::Recorded
    }

    /// Abort because the idle timer elapsed. No-op once decided.
    pub fn expire(&self) -> bool {
        let mut state = self.state.write();
        let decided = state.decide(Outcome::Abort);
        if decided {
            warn!(
                commit_id = %self.id,
                votes = state.votes.len(),
                participants = state.participants.len(),
                "Idle timeout elapsed, aborting"
            );
        }
        decided
    }

    /// Arm the idle timer.
    ///
    /// Does nothing for a zero duration, when a timer is already armed, when
    /// the commit is decided or closed, or outside a tokio runtime. The timer
    /// holds only a weak reference, so it never keeps a retired commit alive.
    pub fn start_idle_timer(self: &Arc<Self>, duration: Duration) -> bool {
        if duration.is_zero() {
            return false;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(commit_id = %self.id, "No tokio runtime, idle timer not armed");
            return false;
        };

        let mut state = self.state.write();
        if state.is_final() || state.idle_timer.is_some() {
            return false;
        }

        let commit = Arc::downgrade(self);
        let task = runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(commit) = commit.upgrade() {
                commit.expire();
            }
        });
        state.idle_timer = Some(task.abort_handle());
        debug!(commit_id = %self.id, timeout_ms = duration.as_millis() as u64, "Idle timer armed");
        true
    }

    /// Whether the transaction has reached a decision.
    pub fn decided(&self) -> bool {
        self.state.read().decision.is_some()
    }

    /// The decision, if reached.
    pub fn outcome(&self) -> Option<Outcome> {
        self.state.read().decision
    }

    /// Take the outcome slot.
    ///
    /// The receiver yields exactly one value, the decision, as soon as it is
    /// made (immediately if already decided). Only the first caller gets it.
    pub fn take_outcome(&self) -> Option<oneshot::Receiver<Outcome>> {
        self.state.write().outcome_rx.take()
    }

    /// Copy of the participant set.
    pub fn participants(&self) -> ParticipantSet {
        self.state.read().participants.clone()
    }

    /// Copy of the affirmative votes received so far.
    pub fn votes(&self) -> ParticipantSet {
        self.state.read().votes.clone()
    }

    /// Participants that have not voted yes, read under one lock.
    pub fn missing_votes(&self) -> ParticipantSet {
        let state = self.state.read();
        state.participants.diff(&state.votes)
    }

    pub fn is_participant(&self, address: &str) -> bool {
        self.state.read().participants.has(address)
    }

    /// Mark the prepare message for this commit as handled.
    ///
    /// Returns `true` only for the first call, so redelivered prepares do not
    /// start a second vote or detector.
    pub fn claim_prepare(&self) -> bool {
        !self.prepare_seen.swap(true, Ordering::AcqRel)
    }

    /// Tear down the commit.
    ///
    /// A pending transaction is forced to abort so nobody waits on the
    /// outcome slot forever. The sets are detached and the timer cancelled.
    /// Returns `false` if the commit was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.state.write();
        if state.closed {
            return false;
        }
        if state.decide(Outcome::Abort) {
            warn!(commit_id = %self.id, "Closed before a decision, aborting");
        }
        state.closed = true;
        state.participants.clear();
        state.votes.clear();
        if let Some(timer) = state.idle_timer.take() {
            timer.abort();
        }
        state.outcome_tx = None;
        debug!(commit_id = %self.id, "Commit closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }
}

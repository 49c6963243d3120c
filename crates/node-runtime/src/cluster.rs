//! # In-Process Cluster
//!
//! Wires several nodes to one in-memory broker and drives a transaction
//! through them.
//!
//! ```text
//! node 0 (coordinator, failure detector)
//!    │ prepare ──→ broker ──→ every node's queue (prefix.*)
//!    │
//! node i ── DelayedVoter ── done(id, true) ──→ broker ──→ every node
//! ```

use crate::config::RuntimeConfig;
use crate::voter::DelayedVoter;
use anyhow::{ensure, Context, Result};
use shared_bus::{BusNotifier, InMemoryBroker, NotifierConfig};
use shared_types::{Address, CommitId};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tpc_commit::{CommitApi, CommitMessageHandler, Node, Outcome, TimeoutDetector};
use tracing::{info, warn};

const LOOKUP_INTERVAL: Duration = Duration::from_millis(10);
const OUTCOME_GRACE: Duration = Duration::from_secs(1);

/// Address of the `index`-th node, `i.i.i.i`.
pub fn node_address(index: usize) -> Address {
    format!("{index}.{index}.{index}.{index}")
}

struct Member {
    node: Arc<Node>,
    notifier: Arc<BusNotifier>,
}

/// Result of one transaction, seen from every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReport {
    pub id: CommitId,
    /// Outcome per node, in node order. `None` if the node never saw the
    /// transaction or did not decide in time.
    pub outcomes: Vec<Option<Outcome>>,
}

impl TransactionReport {
    /// Every node decided to commit.
    pub fn committed(&self) -> bool {
        self.outcomes.iter().all(|o| *o == Some(Outcome::Commit))
    }

    /// Every node decided to abort.
    pub fn aborted(&self) -> bool {
        self.outcomes.iter().all(|o| *o == Some(Outcome::Abort))
    }
}

pub struct Cluster {
    config: RuntimeConfig,
    broker: Arc<InMemoryBroker>,
    members: Vec<Member>,
}

impl Cluster {
    /// Build and start `config.nodes` nodes on `broker`.
    ///
    /// Node 0 coordinates and carries the failure detector. Every node binds
    /// its queue and starts consuming before this returns.
    pub async fn start(config: RuntimeConfig, broker: Arc<InMemoryBroker>) -> Result<Self> {
        ensure!(config.nodes > 0, "cluster needs at least one node");

        let mut members = Vec::with_capacity(config.nodes);
        for index in 0..config.nodes {
            let address = node_address(index);
            let notifier = Arc::new(BusNotifier::new(
                Arc::clone(&broker),
                NotifierConfig::new(
                    format!("node[{address}] queue"),
                    config.prefix.clone(),
                    format!("node{index}_signal"),
                ),
            ));

            let mut node = Node::with_config(address.clone(), notifier.clone(), config.node_config());
            if index == 0 {
                node = node.with_detector(Arc::new(TimeoutDetector::new()));
            }
            let node = Arc::new(node);

            let voter = if config.is_silent(index) {
                DelayedVoter::silent()
            } else {
                DelayedVoter::affirmative(config.reply_delay())
            };
            notifier.set_handler(Arc::new(CommitMessageHandler::with_voter(
                Arc::clone(&node),
                Arc::new(voter),
            )));
            notifier
                .consume()
                .with_context(|| format!("failed to start consuming for node {address}"))?;

            members.push(Member { node, notifier });
        }

        info!(
            nodes = config.nodes,
            silent = ?config.silent_nodes,
            prefix = %config.prefix,
            "Cluster started"
        );
        Ok(Self {
            config,
            broker,
            members,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<InMemoryBroker> {
        &self.broker
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.members
            .iter()
            .map(|m| m.node.address().to_string())
            .collect()
    }

    pub fn node(&self, index: usize) -> Option<&Arc<Node>> {
        self.members.get(index).map(|m| &m.node)
    }

    pub fn notifier(&self, index: usize) -> Option<&Arc<BusNotifier>> {
        self.members.get(index).map(|m| &m.notifier)
    }

    /// Prepare a fresh transaction over every node and wait for each node's
    /// outcome. Retires the commit on every node afterwards.
    pub async fn run_transaction(&self) -> Result<TransactionReport> {
        let coordinator = self
            .members
            .first()
            .map(|m| Arc::clone(&m.node))
            .context("cluster has no nodes")?;

        let id = CommitId::new();
        coordinator
            .prepare(id, self.addresses(), self.config.prepare_timeout())
            .await
            .context("failed to broadcast prepare")?;

        let deadline = Instant::now() + self.outcome_wait();
        let mut outcomes = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let outcome = await_outcome(&member.node, id, deadline).await;
            match outcome {
                Some(outcome) => info!(node = %member.node.address(), commit_id = %id, ?outcome, "Node decided"),
                None => warn!(node = %member.node.address(), commit_id = %id, "Node did not decide in time"),
            }
            outcomes.push(outcome);
        }

        for member in &self.members {
            member.node.close_commit(&id);
        }

        Ok(TransactionReport { id, outcomes })
    }

    fn outcome_wait(&self) -> Duration {
        let deadline = self
            .config
            .prepare_timeout()
            .max(Duration::from_millis(self.config.idle_timeout_ms));
        deadline + self.config.reply_delay() + OUTCOME_GRACE
    }

    /// Close every node and its notifier.
    pub async fn shutdown(&self) -> Result<()> {
        for member in &self.members {
            member
                .node
                .close()
                .await
                .with_context(|| format!("failed to close node {}", member.node.address()))?;
        }
        info!(nodes = self.members.len(), "Cluster shut down");
        Ok(())
    }
}

/// Wait until `node` holds commit `id`, then until it decides.
async fn await_outcome(node: &Node, id: CommitId, deadline: Instant) -> Option<Outcome> {
    let commit = loop {
        if let Some(commit) = node.get_commit(&id) {
            break commit;
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(LOOKUP_INTERVAL).await;
    };

    let outcome = commit.take_outcome()?;
    timeout_at(deadline, outcome).await.ok()?.ok()
}

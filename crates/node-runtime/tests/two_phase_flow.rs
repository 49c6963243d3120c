//! # Two-Phase Flow Tests
//!
//! End-to-end transactions over the in-memory broker: every node consumes
//! its own queue and applies every vote it receives.

use std::sync::Arc;
use std::time::Duration;

use node_runtime::{node_address, Cluster, DelayedVoter, RuntimeConfig};
use shared_bus::{BusNotifier, CommitMessage, InMemoryBroker, Notifier, NotifierConfig};
use shared_types::CommitId;
use tpc_commit::{CommitApi, CommitMessageHandler, Node, Outcome};

fn config(nodes: usize, silent: &[usize]) -> RuntimeConfig {
    RuntimeConfig {
        nodes,
        silent_nodes: silent.to_vec(),
        ..RuntimeConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_unanimous_cluster_commits() {
    let broker = Arc::new(InMemoryBroker::new());
    let cluster = Cluster::start(config(3, &[]), broker.clone()).await.unwrap();

    let report = cluster.run_transaction().await.unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert!(report.committed(), "outcomes: {:?}", report.outcomes);
    // One prepare plus one vote per node.
    assert_eq!(broker.messages_published(), 4);
    for index in 0..3 {
        let node = cluster.node(index).unwrap();
        assert!(node.get_commit(&report.id).is_none());
    }

    cluster.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_silent_participant_aborts_everywhere() {
    let broker = Arc::new(InMemoryBroker::new());
    let cluster = Cluster::start(config(3, &[2]), broker).await.unwrap();

    let report = cluster.run_transaction().await.unwrap();

    assert!(report.aborted(), "outcomes: {:?}", report.outcomes);
    cluster.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_transactions_are_independent() {
    let broker = Arc::new(InMemoryBroker::new());
    let cluster = Cluster::start(config(2, &[]), broker).await.unwrap();

    let first = cluster.run_transaction().await.unwrap();
    let second = cluster.run_transaction().await.unwrap();

    assert_ne!(first.id, second.id);
    assert!(first.committed());
    assert!(second.committed());
    assert_eq!(cluster.node(0).unwrap().commit_count(), 0);

    cluster.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_dissenting_participant_aborts() {
    let broker = Arc::new(InMemoryBroker::new());
    let votes = [Some(true), Some(false)];

    let mut nodes = Vec::new();
    for (index, vote) in votes.into_iter().enumerate() {
        let address = node_address(index);
        let notifier = Arc::new(BusNotifier::new(
            broker.clone(),
            NotifierConfig::new(format!("q{index}"), "commits", format!("node{index}_signal")),
        ));
        let node = Arc::new(Node::new(address, notifier.clone()));
        notifier.set_handler(Arc::new(CommitMessageHandler::with_voter(
            node.clone(),
            Arc::new(DelayedVoter::new(Duration::from_millis(100), vote)),
        )));
        notifier.consume().unwrap();
        nodes.push(node);
    }

    let id = CommitId::new();
    let participants = vec![node_address(0), node_address(1)];
    let commit = nodes[0]
        .prepare(id, participants.clone(), Duration::from_secs(3))
        .await
        .unwrap();
    let outcome = commit.take_outcome().unwrap();

    assert_eq!(outcome.await.unwrap(), Outcome::Abort);

    // A replayed prepare is absorbed and a late yes changes nothing.
    let replay = CommitMessage::prepare(node_address(0), id, participants, Duration::from_secs(3));
    broker.publish("commits.node0_signal", replay.encode().unwrap());
    nodes[1].done(id, true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    for node in &nodes {
        let commit = node.get_commit(&id).unwrap();
        assert_eq!(commit.outcome(), Some(Outcome::Abort));
        assert_eq!(node.commit_count(), 1);
    }

    for node in &nodes {
        node.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_shutdown_releases_queues() {
    let broker = Arc::new(InMemoryBroker::new());
    let cluster = Cluster::start(config(3, &[]), broker.clone()).await.unwrap();
    assert_eq!(broker.binding_count("commits.*"), 3);

    cluster.shutdown().await.unwrap();

    assert_eq!(broker.binding_count("commits.*"), 0);
    let notifier = cluster.notifier(1).unwrap();
    assert!(notifier.is_closed());
    assert!(notifier.emit(b"{}".to_vec()).await.is_err());
}

#[tokio::test]
async fn test_empty_cluster_is_rejected() {
    let broker = Arc::new(InMemoryBroker::new());
    assert!(Cluster::start(config(0, &[]), broker).await.is_err());
}

//! # Inbound Message Handler
//!
//! Decodes deliveries from the notifier and applies them to the node.
//!
//! - `prepare`: create or fetch the local commit. On the first delivery only,
//!   attach the failure detectors and ask the voter for this node's vote.
//! - `response`: look the commit up and apply the vote.
//!
//! Either message for a recently retired id is dropped without touching the
//! registry.
//!
//! Messages are fully validated by [`CommitMessage::decode`] before any
//! commit is touched.

use crate::application::Node;
use crate::domain::VoteOutcome;
use crate::error::{CommitError, CommitResult};
use crate::ports::inbound::CommitApi;
use crate::ports::outbound::ParticipantVoter;
use async_trait::async_trait;
use shared_bus::{BusError, CommitMessage, Delivery, MessageHandler, Signal};
use shared_types::CommitId;
use std::sync::Arc;
use tracing::{debug, warn};

/// What an inbound message did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// A prepare was applied. `first_delivery` is false for redeliveries.
    Prepared { id: CommitId, first_delivery: bool },
    /// A response was applied to a known commit.
    Voted { id: CommitId, outcome: VoteOutcome },
    /// The commit was already retired; the message was dropped.
    Retired { id: CommitId },
}

pub struct CommitMessageHandler {
    node: Arc<Node>,
    voter: Option<Arc<dyn ParticipantVoter>>,
}

impl CommitMessageHandler {
    /// Handler that never votes on its own.
    pub fn new(node: Arc<Node>) -> Self {
        Self { node, voter: None }
    }

    /// Handler that asks `voter` for this node's vote on every new prepare.
    pub fn with_voter(node: Arc<Node>, voter: Arc<dyn ParticipantVoter>) -> Self {
        Self {
            node,
            voter: Some(voter),
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Decode, validate and apply one message body.
    pub async fn handle_message(&self, body: &[u8]) -> CommitResult<Dispatch> {
        let message = CommitMessage::decode(body)?;
        let id = message.commit_id;

        if self.node.is_retired(&id) {
            debug!(
                node = %self.node.address(),
                commit_id = %id,
                kind = message.kind().as_str(),
                "Message for retired commit dropped"
            );
            return Ok(Dispatch::Retired { id });
        }

        match message.signal {
            Signal::Prepare {
                participants,
                timeout,
            } => {
                let commit = self
                    .node
                    .new_commit(id, message.host, participants, timeout);
                if !commit.claim_prepare() {
                    debug!(node = %self.node.address(), commit_id = %id, "Duplicate prepare absorbed");
                    return Ok(Dispatch::Prepared {
                        id,
                        first_delivery: false,
                    });
                }

                self.node.attach_detectors(&commit);

                if let Some(voter) = &self.voter {
                    if commit.is_participant(self.node.address()) {
                        let voter = Arc::clone(voter);
                        let node = Arc::clone(&self.node);
                        tokio::spawn(async move {
                            let Some(ok) = voter.vote(&commit).await else {
                                debug!(node = %node.address(), commit_id = %id, "Staying silent");
                                return;
                            };
                            if let Err(e) = node.done(id, ok).await {
                                warn!(node = %node.address(), commit_id = %id, error = %e, "Failed to emit vote");
                            }
                        });
                    }
                }

                Ok(Dispatch::Prepared {
                    id,
                    first_delivery: true,
                })
            }
            Signal::Response { ok } => {
                let commit = self
                    .node
                    .get_commit(&id)
                    .ok_or(CommitError::CommitNotFound { id })?;
                let outcome = commit.vote(&message.ip, ok);
                Ok(Dispatch::Voted { id, outcome })
            }
        }
    }
}

#[async_trait]
impl MessageHandler for CommitMessageHandler {
    async fn handle(&self, delivery: &Delivery) -> Result<(), BusError> {
        self.handle_message(&delivery.body)
            .await
            .map(|_| ())
            .map_err(|e| BusError::Rejected(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Outcome, TimeoutDetector};
    use crate::ports::outbound::mocks::{RecordingNotifier, StaticVoter};
    use shared_bus::{BusNotifier, InMemoryBroker, MessageError, NotifierConfig};
    use shared_types::Address;
    use std::time::Duration;

    const A: &str = "0.0.0.0";
    const B: &str = "1.1.1.1";

    fn participants() -> Vec<Address> {
        vec![A.to_string(), B.to_string()]
    }

    fn handler(address: &str, vote: Option<bool>) -> (CommitMessageHandler, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let node = Arc::new(Node::new(address, notifier.clone()));
        let handler = CommitMessageHandler::with_voter(node, Arc::new(StaticVoter(vote)));
        (handler, notifier)
    }

    fn prepare(id: CommitId) -> Vec<u8> {
        CommitMessage::prepare(A, id, participants(), Duration::from_secs(3))
            .encode()
            .unwrap()
    }

    #[tokio::test]
    async fn test_prepare_creates_commit_and_votes() {
        let (handler, notifier) = handler(B, Some(true));
        let id = CommitId::new();

        let dispatch = handler.handle_message(&prepare(id)).await.unwrap();
        assert_eq!(
            dispatch,
            Dispatch::Prepared {
                id,
                first_delivery: true
            }
        );
        let commit = handler.node().get_commit(&id).unwrap();
        assert_eq!(commit.host(), A);

        tokio::task::yield_now().await;
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].ip, B);
        assert_eq!(sent[0].signal, Signal::Response { ok: true });
    }

    #[tokio::test]
    async fn test_duplicate_prepare_votes_once() {
        let (handler, notifier) = handler(B, Some(true));
        let id = CommitId::new();

        handler.handle_message(&prepare(id)).await.unwrap();
        let again = handler.handle_message(&prepare(id)).await.unwrap();

        assert_eq!(
            again,
            Dispatch::Prepared {
                id,
                first_delivery: false
            }
        );
        tokio::task::yield_now().await;
        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(handler.node().commit_count(), 1);
    }

    #[tokio::test]
    async fn test_coordinator_votes_on_own_prepare() {
        let (handler, notifier) = handler(A, Some(true));
        let id = CommitId::new();
        handler
            .node()
            .prepare(id, participants(), Duration::from_secs(3))
            .await
            .unwrap();

        let body = notifier.sent()[0].encode().unwrap();
        let dispatch = handler.handle_message(&body).await.unwrap();
        assert_eq!(
            dispatch,
            Dispatch::Prepared {
                id,
                first_delivery: true
            }
        );

        tokio::task::yield_now().await;
        assert_eq!(notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_non_participant_does_not_vote() {
        let (handler, notifier) = handler("9.9.9.9", Some(true));

        handler.handle_message(&prepare(CommitId::new())).await.unwrap();

        tokio::task::yield_now().await;
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_silent_voter_emits_nothing() {
        let (handler, notifier) = handler(B, None);

        handler.handle_message(&prepare(CommitId::new())).await.unwrap();

        tokio::task::yield_now().await;
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_response_applies_vote() {
        let (handler, _) = handler(B, None);
        let id = CommitId::new();
        handler.handle_message(&prepare(id)).await.unwrap();

        let yes = CommitMessage::response(A, A, id, true).encode().unwrap();
        let no = CommitMessage::response(A, B, id, false).encode().unwrap();

        assert_eq!(
            handler.handle_message(&yes).await.unwrap(),
            Dispatch::Voted {
                id,
                outcome: VoteOutcome::Recorded
            }
        );
        assert_eq!(
            handler.handle_message(&no).await.unwrap(),
            Dispatch::Voted {
                id,
                outcome: VoteOutcome::Decided(Outcome::Abort)
            }
        );
        // Replays are absorbed.
        assert_eq!(
            handler.handle_message(&yes).await.unwrap(),
            Dispatch::Voted {
                id,
                outcome: VoteOutcome::Ignored
            }
        );
    }

    #[tokio::test]
    async fn test_response_for_unknown_commit() {
        let (handler, _) = handler(B, None);
        let id = CommitId::new();
        let body = CommitMessage::response(A, A, id, true).encode().unwrap();

        let err = handler.handle_message(&body).await.unwrap_err();
        assert!(matches!(err, CommitError::CommitNotFound { id: missing } if missing == id));
    }

    #[tokio::test]
    async fn test_malformed_message_rejected() {
        let (handler, _) = handler(B, None);

        let err = handler.handle_message(b"{not json").await.unwrap_err();
        assert!(matches!(err, CommitError::Message(MessageError::Format(_))));

        let id = CommitId::new();
        let wrong_shape = format!(
            r#"{{"host":"{A}","ip":"{A}","type":"prepare","commit_id":"{id}","payload":true,"timeout":1000}}"#
        );
        let err = handler
            .handle_message(wrong_shape.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, CommitError::Message(MessageError::InvalidPayload { .. })));
        assert_eq!(handler.node().commit_count(), 0);
    }

    #[tokio::test]
    async fn test_message_handler_maps_errors_to_rejection() {
        let (handler, _) = handler(B, None);
        let delivery = Delivery::new("commits.a", b"garbage".to_vec());

        let result = handler.handle(&delivery).await;
        assert!(matches!(result, Err(BusError::Rejected(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_attaches_detectors() {
        let notifier = Arc::new(RecordingNotifier::new());
        let node = Arc::new(
            Node::new(A, notifier.clone()).with_detector(Arc::new(TimeoutDetector::new())),
        );
        let handler = CommitMessageHandler::new(node);
        let id = CommitId::new();

        handler.handle_message(&prepare(id)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;

        let mut silent: Vec<_> = notifier.sent().into_iter().map(|m| m.ip).collect();
        silent.sort();
        assert_eq!(silent, participants());
    }

    #[tokio::test]
    async fn test_replayed_prepare_after_retirement_is_dropped() {
        let (handler, notifier) = handler(B, Some(true));
        let id = CommitId::new();
        handler.handle_message(&prepare(id)).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(notifier.sent().len(), 1);

        assert!(handler.node().close_commit(&id));
        let replay = handler.handle_message(&prepare(id)).await.unwrap();

        assert_eq!(replay, Dispatch::Retired { id });
        tokio::task::yield_now().await;
        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(handler.node().commit_count(), 0);
        assert!(handler.node().get_commit(&id).is_none());
    }

    #[tokio::test]
    async fn test_late_vote_for_retired_commit_is_dropped() {
        let (handler, _) = handler(B, None);
        let id = CommitId::new();
        handler.handle_message(&prepare(id)).await.unwrap();
        handler.node().close_commit(&id);

        let late = CommitMessage::response(A, A, id, true).encode().unwrap();

        assert_eq!(
            handler.handle_message(&late).await.unwrap(),
            Dispatch::Retired { id }
        );
    }

    #[tokio::test]
    async fn test_closed_node_releases_transport_and_is_freed() {
        let broker = Arc::new(InMemoryBroker::new());
        let notifier = Arc::new(BusNotifier::new(Arc::clone(&broker), NotifierConfig::default()));
        let node = Arc::new(Node::new(B, notifier.clone()));
        notifier.set_handler(Arc::new(CommitMessageHandler::with_voter(
            Arc::clone(&node),
            Arc::new(StaticVoter(None)),
        )));
        notifier.consume().unwrap();
        tokio::task::yield_now().await;
        assert_eq!(broker.binding_count("commits.*"), 1);

        node.close().await.unwrap();

        assert_eq!(broker.binding_count("commits.*"), 0);
        assert_eq!(broker.subscriber_count(), 0);
        assert!(notifier.is_closed());

        let weak_node = Arc::downgrade(&node);
        let weak_notifier = Arc::downgrade(&notifier);
        drop(node);
        drop(notifier);

        assert!(weak_node.upgrade().is_none());
        assert!(weak_notifier.upgrade().is_none());
        assert_eq!(Arc::strong_count(&broker), 1);
    }
}

//! # tpc-commit
//!
//! Two-phase commit core: the per-transaction voting state machine, failure
//! detection, and the node registry that creates and retires commits.
//!
//! ## Overview
//!
//! - **Commit**: collects votes; unanimity commits, one dissent aborts
//! - **Idle Timer**: a pending commit aborts once its deadline passes
//! - **Failure Detector**: reports participants that never voted
//! - **Node**: registry keyed by commit id, emits prepare and vote messages
//!
//! ## Flow
//!
//! ```text
//! Coordinator                         Participant
//!     │ prepare(id, P, timeout)            │
//!     │──────────── prepare ──────────────→│ new_commit + detectors
//!     │                                    │
//!     │←─────────── response(ok) ──────────│ done(id, ok)
//!     │ vote(ip, ok)                       │ vote(ip, ok)
//!     ▼                                    ▼
//!  outcome slot                         outcome slot
//! ```
//!
//! Every node holding a commit applies every vote it receives, so each one
//! reaches the same decision from the same vote history.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tpc_commit::{CommitApi, CommitMessageHandler, Node};
//!
//! let node = Arc::new(Node::new("10.0.0.1", notifier.clone()));
//! notifier.set_handler(Arc::new(CommitMessageHandler::with_voter(node.clone(), voter)));
//! notifier.consume()?;
//!
//! let commit = node.prepare(CommitId::new(), participants, Duration::from_secs(3)).await?;
//! let outcome = commit.take_outcome().unwrap().await?;
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ipc;
pub mod ports;

pub use application::Node;
pub use config::NodeConfig;
pub use domain::{Commit, FailureDetector, Outcome, RetiredCommits, TimeoutDetector, VoteOutcome};
pub use error::{CommitError, CommitResult};
pub use ipc::{CommitMessageHandler, Dispatch};
pub use ports::inbound::CommitApi;
pub use ports::outbound::ParticipantVoter;

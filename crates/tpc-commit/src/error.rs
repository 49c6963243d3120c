//! Error types for the commit core.

use shared_bus::{BusError, MessageError};
use shared_types::CommitId;
use thiserror::Error;

/// Commit core errors.
///
/// Invalid votes and duplicate registrations are not errors; they are
/// absorbed as no-ops by the state machine and the registry.
#[derive(Debug, Error)]
pub enum CommitError {
    /// Inbound message failed to decode or validate
    #[error("Invalid message: {0}")]
    Message(#[from] MessageError),

    /// Notifier refused or failed to deliver
    #[error("Transport error: {0}")]
    Transport(#[from] BusError),

    /// Response references a commit this node does not hold
    #[error("Commit not found: {id}")]
    CommitNotFound { id: CommitId },
}

/// Result type for commit operations
pub type CommitResult<T> = Result<T, CommitError>;

//! Ports: the API a node offers and the collaborators it drives.

pub mod inbound;
pub mod outbound;

pub use inbound::CommitApi;
pub use outbound::ParticipantVoter;

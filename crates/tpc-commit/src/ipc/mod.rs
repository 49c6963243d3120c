//! Inbound side of the transport.

pub mod handler;

pub use handler::{CommitMessageHandler, Dispatch};

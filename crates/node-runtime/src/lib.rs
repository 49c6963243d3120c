//! # Node Runtime Library
//!
//! Example wiring for the two-phase commit core: an in-process cluster of
//! nodes sharing one broker. The main entry point is the `main.rs` binary.

pub mod cluster;
pub mod config;
pub mod voter;

pub use cluster::{node_address, Cluster, TransactionReport};
pub use config::{RuntimeConfig, LOG_LEVEL_ENV};
pub use voter::DelayedVoter;

//! # Shared Types Crate
//!
//! Identifiers and membership sets shared by the bus, the commit core and
//! the runtime wiring.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: `CommitId` and `Address` are defined once here.
//! - **No async**: this crate is a leaf; it never depends on a runtime.

pub mod entities;
pub mod participant_set;

pub use entities::{Address, CommitId};
pub use participant_set::{ParticipantSet, SyncParticipantSet};

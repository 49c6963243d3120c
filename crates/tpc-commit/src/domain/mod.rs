//! Domain layer: the voting state machine and failure detection.

pub mod commit;
pub mod detector;
pub mod outcome;
pub mod retired;

pub use commit::Commit;
pub use detector::{FailureDetector, TimeoutDetector};
pub use outcome::{Outcome, VoteOutcome};
pub use retired::RetiredCommits;

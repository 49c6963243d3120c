//! Decision values of a transaction.

use serde::{Deserialize, Serialize};

/// Final decision of a two-phase commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Every participant voted yes.
    Commit,
    /// A participant dissented, the deadline passed, or the commit was closed.
    Abort,
}

impl Outcome {
    #[must_use]
    pub fn is_commit(&self) -> bool {
        matches!(self, Outcome::Commit)
    }
}

impl From<bool> for Outcome {
    fn from(ok: bool) -> Self {
        if ok {
            Outcome::Commit
        } else {
            Outcome::Abort
        }
    }
}

impl From<Outcome> for bool {
    fn from(outcome: Outcome) -> Self {
        outcome.is_commit()
    }
}

/// What a single call to `Commit::vote` did.
///
/// Ignored votes are not errors: duplicates, late votes and votes from
/// non-participants are expected on a broadcast transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    /// No state change.
    Ignored,
    /// Affirmative vote counted; still waiting for others.
    Recorded,
    /// This vote decided the transaction.
    Decided(Outcome),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_bool_conversion() {
        assert_eq!(Outcome::from(true), Outcome::Commit);
        assert_eq!(Outcome::from(false), Outcome::Abort);
        assert!(bool::from(Outcome::Commit));
        assert!(!bool::from(Outcome::Abort));
    }
}

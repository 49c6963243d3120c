//! # Retired Commits
//!
//! Remembers the ids of commits a node has retired, for a bounded time, so a
//! redelivered prepare cannot bring a finished transaction back to life.
//!
//! - Ids expire `ttl` after retirement
//! - Expired ids are garbage-collected on insert, bounding memory
//! - A zero `ttl` disables the cache

use parking_lot::Mutex;
use shared_types::CommitId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Time-bounded set of retired commit ids.
#[derive(Debug)]
pub struct RetiredCommits {
    /// Map of id -> instant the id may be forgotten.
    entries: Mutex<HashMap<CommitId, Instant>>,
    ttl: Duration,
}

impl RetiredCommits {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Record `id` as retired.
    pub fn retire(&self, id: CommitId) {
        if self.ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, expires| *expires > now);
        entries.insert(id, now + self.ttl);
    }

    /// Whether `id` was retired less than `ttl` ago.
    pub fn contains(&self, id: &CommitId) -> bool {
        self.entries
            .lock()
            .get(id)
            .is_some_and(|expires| *expires > Instant::now())
    }

    /// Ids currently remembered, expired ones included until the next insert.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

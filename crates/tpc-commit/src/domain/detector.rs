//! # Failure Detection
//!
//! A detector watches a commit and, once its deadline passes without full
//! agreement, reports the participants that never voted so the observing
//! node can abort on their behalf.

use crate::domain::commit::Commit;
use parking_lot::Mutex;
use shared_types::{CommitId, ParticipantSet};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Observes commits and reports silent participants.
pub trait FailureDetector: Send + Sync {
    /// Start watching `commit`.
    ///
    /// The receiver yields at most one value. `None` means nothing is
    /// watched: the commit has no deadline, or the detector cannot arm a
    /// timer. Must not mutate the commit.
    fn detect(&self, commit: &Arc<Commit>) -> Option<oneshot::Receiver<ParticipantSet>>;

    /// Stop watching one commit. No-op if the timer already fired.
    fn cancel(&self, id: &CommitId);

    /// Stop every armed timer and refuse new ones.
    fn close(&self);
}

/// Reports `participants \ votes` after the commit's own timeout.
///
/// If every participant voted in time the receiver is dropped without a
/// value.
#[derive(Debug, Default)]
pub struct TimeoutDetector {
    timers: Mutex<HashMap<CommitId, Vec<AbortHandle>>>,
    closed: AtomicBool,
}

impl TimeoutDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Timers still armed.
    pub fn armed(&self) -> usize {
        self.timers
            .lock()
            .values()
            .flatten()
            .filter(|timer| !timer.is_finished())
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl FailureDetector for TimeoutDetector {
    fn detect(&self, commit: &Arc<Commit>) -> Option<oneshot::Receiver<ParticipantSet>> {
        if self.is_closed() {
            return None;
        }
        let deadline = commit.timeout()?;
        let runtime = Handle::try_current().ok()?;

        let id = commit.id();
        let watched = Arc::downgrade(commit);
        let (tx, rx) = oneshot::channel();

        let task = runtime.spawn(async move {
            tokio::time::sleep(deadline).await;
            let Some(commit) = watched.upgrade() else {
                return;
            };
            let missing = commit.missing_votes();
            if missing.is_empty() {
                debug!(commit_id = %id, "All participants voted before the deadline");
                return;
            }
            warn!(
                commit_id = %id,
                missing = ?missing.to_vec(),
                "Participants failed to vote before the deadline"
            );
            let _ = tx.send(missing);
        });

        let mut timers = self.timers.lock();
        timers.retain(|_, handles| {
            handles.retain(|h| !h.is_finished());
            !handles.is_empty()
        });
        timers.entry(id).or_default().push(task.abort_handle());
        debug!(commit_id = %id, deadline_ms = deadline.as_millis() as u64, "Detector armed");

        Some(rx)
    }

    fn cancel(&self, id: &CommitId) {
        if let Some(handles) = self.timers.lock().remove(id) {
            for handle in handles {
                handle.abort();
            }
            debug!(commit_id = %id, "Detector cancelled");
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let timers: Vec<_> = self.timers.lock().drain().collect();
        for (_, handles) in timers {
            for handle in handles {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const A: &str = "0.0.0.0";
    const B: &str = "1.1.1.1";

    fn commit(timeout: Duration) -> Arc<Commit> {
        Arc::new(Commit::new(CommitId::new(), A, [A, B], timeout))
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_all_when_nobody_votes() {
        let detector = TimeoutDetector::new();
        let commit = commit(Duration::from_secs(1));

        let report = detector.detect(&commit).unwrap();
        let missing = report.await.unwrap();

        assert_eq!(missing, ParticipantSet::with_members([A, B]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_diff_at_fire_time() {
        let detector = TimeoutDetector::new();
        let commit = commit(Duration::from_secs(1));
        let report = detector.detect(&commit).unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        commit.vote(A, true);

        let missing = report.await.unwrap();
        assert_eq!(missing, commit.participants().diff(&commit.votes()));
        assert_eq!(missing, ParticipantSet::with_members([B]));
        // Reporting alone never decides the commit.
        assert!(!commit.decided());
    }

    #[tokio::test(start_paused = true)]
    async fn test_yields_nothing_after_unanimity() {
        let detector = TimeoutDetector::new();
        let commit = commit(Duration::from_secs(1));
        let report = detector.detect(&commit).unwrap();

        commit.vote(A, true);
        commit.vote(B, true);

        assert!(report.await.is_err());
    }

    #[tokio::test]
    async fn test_no_deadline_yields_nothing() {
        let detector = TimeoutDetector::new();
        assert!(detector.detect(&commit(Duration::ZERO)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_detectors_on_one_commit() {
        let first = TimeoutDetector::new();
        let second = TimeoutDetector::new();
        let commit = commit(Duration::from_secs(2));

        let a = first.detect(&commit).unwrap();
        let b = second.detect(&commit).unwrap();

        assert_eq!(a.await.unwrap(), b.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_report() {
        let detector = TimeoutDetector::new();
        let commit = commit(Duration::from_secs(1));
        let report = detector.detect(&commit).unwrap();
        assert_eq!(detector.armed(), 1);

        detector.cancel(&commit.id());
        detector.cancel(&commit.id());

        assert!(report.await.is_err());
        assert_eq!(detector.armed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_everything() {
        let detector = TimeoutDetector::new();
        let first = commit(Duration::from_secs(1));
        let second = commit(Duration::from_secs(1));
        let r1 = detector.detect(&first).unwrap();
        let r2 = detector.detect(&second).unwrap();

        detector.close();

        assert!(r1.await.is_err());
        assert!(r2.await.is_err());
        assert!(detector.is_closed());
        assert!(detector.detect(&first).is_none());
    }
}

//! Node configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-node settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Idle timer for commits whose prepare carried no timeout (ms).
    /// `0` leaves such commits without an idle timer.
    pub idle_timeout_ms: u64,

    /// Attach the node's failure detectors to incoming prepares.
    pub detect_failures: bool,

    /// How long a retired commit id keeps absorbing replayed prepares (ms).
    /// `0` forgets ids as soon as they are retired.
    pub retired_ttl_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 5_000,
            detect_failures: true,
            retired_ttl_ms: 60_000,
        }
    }
}

impl NodeConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[must_use]
    pub fn retired_ttl(&self) -> Duration {
        Duration::from_millis(self.retired_ttl_ms)
    }
}

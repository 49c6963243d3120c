//! Runtime configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use tpc_commit::NodeConfig;
use tracing::warn;

/// Log filter variable, read before the subscriber is installed.
pub const LOG_LEVEL_ENV: &str = "TPC_LOG_LEVEL";

/// Settings of the in-process demo cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of nodes; node 0 coordinates.
    pub nodes: usize,
    /// Deadline carried by the prepare message (ms).
    pub prepare_timeout_ms: u64,
    /// Fallback idle timer for commits without a deadline (ms).
    pub idle_timeout_ms: u64,
    /// How long a participant waits before voting (ms).
    pub reply_delay_ms: u64,
    /// Indices of nodes that never reply.
    pub silent_nodes: Vec<usize>,
    /// Log level filter (trace, debug, info, warn, error)
    pub log_level: String,
    /// Routing key prefix shared by the cluster.
    pub prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            nodes: 3,
            prepare_timeout_ms: 3_000,
            idle_timeout_ms: 5_000,
            reply_delay_ms: 1_000,
            silent_nodes: Vec::new(),
            log_level: "info".to_string(),
            prefix: "commits".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TPC_NODES`: cluster size (default: 3)
    /// - `TPC_PREPARE_TIMEOUT_MS`: prepare deadline (default: 3000)
    /// - `TPC_IDLE_TIMEOUT_MS`: fallback idle timer (default: 5000)
    /// - `TPC_REPLY_DELAY_MS`: participant reply delay (default: 1000)
    /// - `TPC_SILENT_NODES`: comma-separated node indices that never reply
    /// - `TPC_LOG_LEVEL`: log filter (default: info)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            nodes: parse_or(&lookup, "TPC_NODES", defaults.nodes),
            prepare_timeout_ms: parse_or(&lookup, "TPC_PREPARE_TIMEOUT_MS", defaults.prepare_timeout_ms),
            idle_timeout_ms: parse_or(&lookup, "TPC_IDLE_TIMEOUT_MS", defaults.idle_timeout_ms),
            reply_delay_ms: parse_or(&lookup, "TPC_REPLY_DELAY_MS", defaults.reply_delay_ms),
            silent_nodes: lookup("TPC_SILENT_NODES")
                .map(|raw| parse_indices(&raw))
                .unwrap_or(defaults.silent_nodes),
            log_level: lookup(LOG_LEVEL_ENV).unwrap_or(defaults.log_level),
            prefix: defaults.prefix,
        }
    }

    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_ms)
    }

    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.reply_delay_ms)
    }

    pub fn is_silent(&self, index: usize) -> bool {
        self.silent_nodes.contains(&index)
    }

    /// Configuration handed to every node.
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            idle_timeout_ms: self.idle_timeout_ms,
            detect_failures: true,
            ..NodeConfig::default()
        }
    }
}

fn parse_or<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Unparseable value, keeping default");
            default
        }),
        None => default,
    }
}

fn parse_indices(raw: &str) -> Vec<usize> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| match part.parse() {
            Ok(index) => Some(index),
            Err(_) => {
                warn!(value = part, "Ignoring invalid node index in TPC_SILENT_NODES");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::from_lookup(lookup(&[]));
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.prepare_timeout(), Duration::from_secs(3));
        assert_eq!(config.node_config().idle_timeout_ms, 5_000);
    }

    #[test]
    fn test_overrides() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("TPC_NODES", "5"),
            ("TPC_PREPARE_TIMEOUT_MS", "1500"),
            ("TPC_SILENT_NODES", "2, 4"),
            ("TPC_LOG_LEVEL", "debug"),
        ]));

        assert_eq!(config.nodes, 5);
        assert_eq!(config.prepare_timeout_ms, 1_500);
        assert_eq!(config.silent_nodes, vec![2, 4]);
        assert!(config.is_silent(4));
        assert!(!config.is_silent(0));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("TPC_NODES", "many"),
            ("TPC_REPLY_DELAY_MS", "-1"),
            ("TPC_SILENT_NODES", "1,x,"),
        ]));

        assert_eq!(config.nodes, 3);
        assert_eq!(config.reply_delay_ms, 1_000);
        assert_eq!(config.silent_nodes, vec![1]);
    }
}

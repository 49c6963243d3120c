//! # Two-Phase Commit Demo Node
//!
//! Starts an in-process cluster, runs one transaction and logs what every
//! node decided.
//!
//! ## Startup Sequence
//!
//! 1. Install the log subscriber (`RUST_LOG`, then `TPC_LOG_LEVEL`)
//! 2. Load configuration from the environment
//! 3. Bind every node's queue and start consuming
//! 4. Node 0 prepares; participants reply after the configured delay
//! 5. Shut down

use std::sync::Arc;

use anyhow::{Context, Result};
use node_runtime::{Cluster, RuntimeConfig, LOG_LEVEL_ENV};
use shared_bus::InMemoryBroker;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() -> Result<()> {
    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .with_context(|| format!("invalid log filter {level:?}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = RuntimeConfig::from_env();
    info!(?config, "Configuration loaded");

    let broker = Arc::new(InMemoryBroker::new());
    let cluster = Cluster::start(config, broker)
        .await
        .context("failed to start cluster")?;

    let report = cluster.run_transaction().await?;
    for (address, outcome) in cluster.addresses().iter().zip(&report.outcomes) {
        match outcome {
            Some(outcome) => info!(node = %address, commit_id = %report.id, ?outcome, "Outcome"),
            None => info!(node = %address, commit_id = %report.id, "No outcome"),
        }
    }
    info!(commit_id = %report.id, committed = report.committed(), "Transaction finished");

    cluster.shutdown().await
}

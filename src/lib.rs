//! Harbor - one node of a decentralized content-storage network.
//!
//! A Harbor node answers two questions without talking to anyone: which
//! slices of the content keyspace it stores, and what work it owes the
//! network. Placement is a pure function (suffix sharding plus rendezvous
//! hashing over the cluster's node identities), so every node computes the
//! same answers independently. Uploaded content flows through an
//! asynchronous job pipeline and finished artifacts are copied to durable
//! storage by the nodes that own them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Harbor node                       │
//! ├──────────────────────────────────────────────────────────┤
//! │  Placement: Sharder | RendezvousDecider | Registry       │
//! ├──────────────────────────────────────────────────────────┤
//! │  Pipeline: JobsManager workers | JobsMonitor | Mover     │
//! ├──────────────────────────────────────────────────────────┤
//! │  Substrate: KV + change feed | queues/streams | blobs    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use harbor::config::HarborConfig;
//!
//! #[tokio::main]
//! async fn main() -> harbor::Result<()> {
//!     let config = HarborConfig::development();
//!     harbor::run(config).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod types;

pub mod jobs;
pub mod mover;
pub mod observability;
pub mod placement;
pub mod registry;
pub mod shutdown;
pub mod substrate;

// Re-exports
pub use error::{HarborError, Result};
pub use types::{ContentId, JobId, NodeId, ShardLabel};

use config::HarborConfig;
use jobs::{JobsManager, PassthroughTranscoder};
use mover::LongTermMover;
use placement::{RendezvousDecider, Sharder};
use registry::ClusterRegistry;
use shutdown::{ServiceHandle, ShutdownCoordinator, ShutdownManager, SignalHandler};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Run a Harbor node with the given configuration.
///
/// Uses the in-process substrate, which makes this a self-contained
/// single-process node; a deployment against a real replicated backend
/// supplies its own [`substrate::Substrate`] implementation and wires the
/// same services.
pub async fn run(config: HarborConfig) -> Result<()> {
    config.validate()?;
    observability::init(&config.observability)?;

    info!(node = %config.node.id, namespace = %config.placement.namespace, "Starting Harbor node");

    let self_node = NodeId::new(config.node.id.clone());
    let peers: Vec<NodeId> = config
        .placement
        .peers
        .iter()
        .map(|p| NodeId::new(p.clone()))
        .collect();
    let decider = Arc::new(RendezvousDecider::new(
        config.placement.namespace.clone(),
        config.placement.replication_factor,
        self_node.clone(),
        peers.clone(),
        Sharder::new(config.placement.shard_suffix_len),
    ));
    observability::update_placement_metrics(decider.owned_shards().len(), peers.len());

    let substrate = substrate::MemorySubstrate::with_temp_ttl(Some(config.jobs.temp_ttl));

    let coordinator = ShutdownCoordinator::new();
    let mut shutdown_manager = ShutdownManager::new(coordinator.clone());
    let mut handles = Vec::new();

    // advertise ownership before accepting work
    let registry = ClusterRegistry::new(
        &config.placement.namespace,
        self_node.clone(),
        substrate.as_ref(),
    );
    registry
        .set_host_and_shards_for_node(config.node.host.clone(), decider.owned_shards())
        .await?;

    let manager = JobsManager::new(
        config.placement.namespace.clone(),
        self_node.as_str(),
        substrate.as_ref(),
        Arc::new(PassthroughTranscoder),
        config.jobs.ack_wait,
    );

    let monitor = manager.monitor().clone();
    let monitor_shutdown = coordinator.watch();
    handles.push((
        "monitor",
        tokio::spawn(async move {
            if let Err(e) = monitor.run(monitor_shutdown).await {
                error!("Job monitor error: {}", e);
            }
        }),
    ));
    shutdown_manager.register(ServiceHandle::simple("monitor"));

    for handle in manager.start_workers(config.jobs.workers, coordinator.watch()) {
        handles.push(("worker", handle));
    }
    shutdown_manager.register(ServiceHandle::simple("workers"));

    let mover = LongTermMover::new(decider.clone(), substrate.as_ref());
    let mover_shutdown = coordinator.watch();
    handles.push((
        "mover",
        tokio::spawn(async move {
            if let Err(e) = mover.run(mover_shutdown).await {
                error!("Long-term mover error: {}", e);
            }
        }),
    ));
    shutdown_manager.register(ServiceHandle::simple("mover"));

    if config.observability.metrics_enabled {
        let obs_config = config.observability.clone();
        handles.push((
            "metrics",
            tokio::spawn(async move {
                if let Err(e) = observability::run_metrics_server(obs_config).await {
                    error!("Metrics server error: {}", e);
                }
            }),
        ));
        shutdown_manager.register(ServiceHandle::simple("metrics"));
    }

    let signal_coordinator = coordinator.clone();
    tokio::spawn(async move {
        SignalHandler::new(signal_coordinator).run().await;
    });

    coordinator.wait_for_shutdown().await;

    info!("Shutting down Harbor gracefully...");
    shutdown_manager.run().await;

    for (name, handle) in handles {
        if !handle.is_finished() {
            warn!(service = %name, "Force aborting service");
            handle.abort();
        }
    }

    info!("Harbor shutdown complete");
    Ok(())
}

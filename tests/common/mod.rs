//! Common test utilities for integration tests.
//!
//! A [`TestCluster`] runs several simulated nodes in one process. The nodes
//! share a single in-memory substrate standing in for the replicated
//! backend, while each node gets its own durable store through a node view,
//! like its own disk.

use harbor::jobs::{JobsManager, PassthroughTranscoder};
use harbor::mover::LongTermMover;
use harbor::placement::{RendezvousDecider, Sharder};
use harbor::registry::ClusterRegistry;
use harbor::substrate::{MemorySubstrate, NodeView};
use harbor::types::NodeId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const NAMESPACE: &str = "testnet";
pub const WORKERS_PER_NODE: usize = 2;
pub const ACK_WAIT: Duration = Duration::from_secs(30);

/// One simulated node: decider, pipeline services, and a node-local view
/// of the shared substrate.
pub struct TestNode {
    pub id: NodeId,
    pub decider: Arc<RendezvousDecider>,
    pub manager: Arc<JobsManager>,
    pub substrate: Arc<NodeView>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl TestNode {
    async fn start(
        shared: &Arc<MemorySubstrate>,
        id: NodeId,
        peers: Vec<NodeId>,
        replication_factor: usize,
        suffix_len: usize,
    ) -> Self {
        let substrate = shared.node_view();
        let decider = Arc::new(RendezvousDecider::new(
            NAMESPACE,
            replication_factor,
            id.clone(),
            peers,
            Sharder::new(suffix_len),
        ));

        let registry = ClusterRegistry::new(NAMESPACE, id.clone(), substrate.as_ref());
        registry
            .set_host_and_shards_for_node(
                format!("https://{}.example.com", id),
                decider.owned_shards(),
            )
            .await
            .expect("registry write");

        let manager = JobsManager::new(
            NAMESPACE,
            id.as_str(),
            substrate.as_ref(),
            Arc::new(PassthroughTranscoder),
            ACK_WAIT,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = manager.start_workers(WORKERS_PER_NODE, shutdown_rx.clone());

        let monitor = manager.monitor().clone();
        let monitor_shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            monitor.run(monitor_shutdown).await.expect("monitor loop");
        }));

        let mover = LongTermMover::new(decider.clone(), substrate.as_ref());
        handles.push(tokio::spawn(async move {
            mover.run(shutdown_rx).await.expect("mover loop");
        }));

        Self {
            id,
            decider,
            manager,
            substrate,
            shutdown_tx,
            handles,
        }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            handle.await.expect("service task");
        }
    }
}

/// A whole simulated cluster over one shared substrate.
pub struct TestCluster {
    pub substrate: Arc<MemorySubstrate>,
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    pub async fn start(node_count: usize, replication_factor: usize, suffix_len: usize) -> Self {
        let substrate = MemorySubstrate::new();
        let peers: Vec<NodeId> = (0..node_count)
            .map(|i| NodeId::new(format!("0xnode{:02}", i)))
            .collect();

        let mut nodes = Vec::new();
        for id in &peers {
            nodes.push(
                TestNode::start(
                    &substrate,
                    id.clone(),
                    peers.clone(),
                    replication_factor,
                    suffix_len,
                )
                .await,
            );
        }

        Self { substrate, nodes }
    }

    pub fn node(&self, i: usize) -> &TestNode {
        &self.nodes[i]
    }

    pub async fn shutdown(self) {
        for node in self.nodes {
            node.shutdown().await;
        }
    }
}

/// Poll `check` until it returns true or the timeout lapses.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Async variant of [`wait_until`] for checks that must await.
pub async fn wait_until_async<F, Fut>(timeout: Duration, check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

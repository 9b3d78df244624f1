//! Rendezvous-hash placement: which nodes store which shards.
//!
//! Every node scores every (node, shard) pair with the same hash and keeps
//! the shards where it ranks among the top `replication_factor` nodes. For a
//! fixed node set the result is a pure deterministic function, identical on
//! every node, so no coordination is needed to agree on placement.
//!
//! Rendezvous (highest-random-weight) hashing is used rather than modulo or
//! ring hashing: adding or removing one node remaps only ~1/|nodes| of the
//! shards instead of reshuffling everything.

use crate::error::Result;
use crate::placement::Sharder;
use crate::types::{NodeId, ShardLabel};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Deterministic shard-ownership decider for one node.
///
/// The node set is immutable for the lifetime of an instance. When cluster
/// membership changes, construct a new decider; migrating already-stored
/// shards to their new owners is a separate rebalancing concern not handled
/// here.
#[derive(Debug, Clone)]
pub struct RendezvousDecider {
    namespace: String,
    replication_factor: usize,
    self_node: NodeId,
    nodes: Vec<NodeId>,
    sharder: Sharder,
    owned: HashSet<ShardLabel>,
}

impl RendezvousDecider {
    /// Build a decider and precompute this node's owned-shard set.
    pub fn new(
        namespace: impl Into<String>,
        replication_factor: usize,
        self_node: NodeId,
        mut nodes: Vec<NodeId>,
        sharder: Sharder,
    ) -> Self {
        nodes.sort();
        nodes.dedup();

        let mut decider = Self {
            namespace: namespace.into(),
            replication_factor,
            self_node,
            nodes,
            sharder,
            owned: HashSet::new(),
        };
        decider.owned = decider.compute_owned();

        info!(
            node = %decider.self_node,
            nodes = decider.nodes.len(),
            replication_factor,
            owned_shards = decider.owned.len(),
            "Computed shard ownership"
        );

        decider
    }

    /// Whether this node is one of the replicas for the given content id.
    pub fn should_store(&self, id: &str) -> Result<bool> {
        let shard = self.sharder.shard_for_str(id)?;
        Ok(self.owned.contains(&shard))
    }

    /// The shards this node owns, in enumeration order.
    pub fn owned_shards(&self) -> Vec<ShardLabel> {
        self.sharder
            .enumerate_shards()
            .into_iter()
            .filter(|s| self.owned.contains(s))
            .collect()
    }

    /// The storage-bucket key prefix for a content id: `{namespace}_{shard}`.
    pub fn namespaced_key_for(&self, id: &str) -> Result<String> {
        let shard = self.sharder.shard_for_str(id)?;
        Ok(format!("{}_{}", self.namespace, shard))
    }

    /// The ordered top-N replica set for a shard, highest score first.
    ///
    /// Identical on every node holding the same inputs; used to answer
    /// "who stores X" without asking anyone.
    pub fn replicas_for(&self, shard: &ShardLabel) -> Vec<NodeId> {
        let mut scored: Vec<(u64, &NodeId)> = self
            .nodes
            .iter()
            .map(|node| (rendezvous_score(node, shard), node))
            .collect();
        // highest score wins; hash ties break toward the lexicographically
        // smaller node id, the same on every node
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored
            .into_iter()
            .take(self.replication_factor)
            .map(|(_, node)| node.clone())
            .collect()
    }

    /// The full shard-to-replicas table.
    pub fn ownership_table(&self) -> HashMap<ShardLabel, Vec<NodeId>> {
        self.sharder
            .enumerate_shards()
            .into_iter()
            .map(|shard| {
                let replicas = self.replicas_for(&shard);
                (shard, replicas)
            })
            .collect()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    pub fn self_node(&self) -> &NodeId {
        &self.self_node
    }

    pub fn sharder(&self) -> &Sharder {
        &self.sharder
    }

    fn compute_owned(&self) -> HashSet<ShardLabel> {
        self.sharder
            .enumerate_shards()
            .into_iter()
            .filter(|shard| self.replicas_for(shard).contains(&self.self_node))
            .collect()
    }
}

/// Uniform hash score for one (node, shard) pair: SHA-256 over the node
/// identity concatenated with the shard label, first 8 bytes as a big-endian
/// integer.
fn rendezvous_score(node: &NodeId, shard: &ShardLabel) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(node.as_str().as_bytes());
    hasher.update(shard.as_str().as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

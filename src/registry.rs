//! Cluster registry: advertised shard ownership per node.
//!
//! Each node writes exactly one key, its own, into the nodes KV bucket; the
//! full bucket is the cluster's eventually consistent ownership map. Readers
//! use it for routing and dashboards and tolerate staleness; the decider,
//! not the registry, is the authority on what this node stores.

use crate::error::Result;
use crate::substrate::{KvBucket, Substrate};
use crate::types::{NodeId, ShardLabel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// KV bucket holding one [`NodeStatus`] per node.
pub fn nodes_kv_bucket(namespace: &str) -> String {
    format!("{}_nodes-kv", namespace)
}

/// What one node advertises about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Reachable host address for content fetches.
    pub host: String,
    /// Shards the node currently claims to store.
    pub shards: Vec<ShardLabel>,
}

/// Read/write handle on the nodes bucket for one node.
pub struct ClusterRegistry {
    self_node: NodeId,
    nodes_kv: Arc<dyn KvBucket>,
}

impl ClusterRegistry {
    pub fn new(namespace: &str, self_node: NodeId, substrate: &dyn Substrate) -> Self {
        Self {
            self_node,
            nodes_kv: substrate.kv_bucket(&nodes_kv_bucket(namespace)),
        }
    }

    /// Publish this node's host and owned shards. Single-writer: a node
    /// only ever writes its own key.
    pub async fn set_host_and_shards_for_node(
        &self,
        host: impl Into<String>,
        shards: Vec<ShardLabel>,
    ) -> Result<()> {
        let status = NodeStatus {
            host: host.into(),
            shards,
        };
        info!(
            node = %self.self_node,
            host = %status.host,
            shards = status.shards.len(),
            "Publishing node status"
        );
        self.nodes_kv
            .put(self.self_node.as_str(), serde_json::to_vec(&status)?)
            .await
    }

    /// The full node-to-shards map as currently replicated. A record that
    /// fails to decode is skipped rather than failing the whole read.
    pub async fn get_nodes_to_shards(&self) -> Result<HashMap<NodeId, NodeStatus>> {
        let mut map = HashMap::new();
        for entry in self.nodes_kv.entries().await? {
            match serde_json::from_slice::<NodeStatus>(&entry.value) {
                Ok(status) => {
                    map.insert(NodeId::new(entry.key), status);
                }
                Err(err) => warn!(node = %entry.key, %err, "Skipping malformed node status"),
            }
        }
        Ok(map)
    }
}

//! Placement integration tests: cluster-wide agreement without coordination.

mod common;

use common::{wait_until_async, TestCluster};
use harbor::placement::{RendezvousDecider, Sharder};
use harbor::types::{ContentId, NodeId};
use std::collections::HashSet;
use std::time::Duration;

fn node_ids(n: usize) -> Vec<NodeId> {
    (0..n).map(|i| NodeId::new(format!("0xnode{:02}", i))).collect()
}

#[test]
fn test_all_nodes_compute_identical_ownership_tables() {
    let peers = node_ids(7);
    let tables: Vec<_> = peers
        .iter()
        .map(|node| {
            RendezvousDecider::new("testnet", 3, node.clone(), peers.clone(), Sharder::new(2))
                .ownership_table()
        })
        .collect();

    for table in &tables[1..] {
        assert_eq!(*table, tables[0]);
    }
}

#[test]
fn test_every_content_id_has_exactly_n_storers() {
    let peers = node_ids(5);
    let deciders: Vec<_> = peers
        .iter()
        .map(|node| {
            RendezvousDecider::new("testnet", 2, node.clone(), peers.clone(), Sharder::new(1))
        })
        .collect();

    for _ in 0..100 {
        let id = ContentId::generate();
        let storers = deciders
            .iter()
            .filter(|d| d.should_store(id.as_str()).unwrap())
            .count();
        assert_eq!(storers, 2, "content {} has {} storers", id, storers);
    }
}

#[test]
fn test_membership_change_keeps_most_placements() {
    let peers = node_ids(12);
    let sharder = Sharder::new(2);
    let before =
        RendezvousDecider::new("testnet", 3, peers[0].clone(), peers.clone(), sharder.clone());

    let mut grown = peers.clone();
    grown.push(NodeId::new("0xnode99"));
    let after = RendezvousDecider::new("testnet", 3, peers[0].clone(), grown, sharder);

    let before_set: HashSet<_> = before.owned_shards().into_iter().collect();
    let after_set: HashSet<_> = after.owned_shards().into_iter().collect();
    let changed = before_set.symmetric_difference(&after_set).count();

    // one node joining a 12-node cluster should touch roughly 1/13 of the
    // shard space
    assert!(
        changed < 36 * 36 / 4,
        "{} of {} shards changed ownership",
        changed,
        36 * 36
    );
}

#[tokio::test]
async fn test_registry_reflects_each_nodes_owned_shards() {
    let cluster = TestCluster::start(4, 2, 1).await;

    let registry = harbor::registry::ClusterRegistry::new(
        common::NAMESPACE,
        cluster.node(0).id.clone(),
        cluster.node(0).substrate.as_ref(),
    );

    let converged = wait_until_async(Duration::from_secs(2), || async {
        registry
            .get_nodes_to_shards()
            .await
            .map(|m| m.len() == cluster.nodes.len())
            .unwrap_or(false)
    })
    .await;
    assert!(converged);

    let map = registry.get_nodes_to_shards().await.unwrap();
    for node in &cluster.nodes {
        let status = &map[&node.id];
        assert_eq!(status.shards, node.decider.owned_shards());
    }

    cluster.shutdown().await;
}

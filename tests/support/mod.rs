//! Shared helpers for integration and property tests.
//!
//! Graphs are described as undirected edge lists `(a, b, weight)` over
//! vertex ids. Engines run against the deterministic in-process router;
//! no real network I/O.

#![allow(dead_code)] // not every test binary uses every helper

use std::collections::BTreeMap;

use larch::Engine;
use larch::MstSummary;
use larch::config::NeighbourEntry;
use larch::config::NodeConfig;
use larch::engine::MstContribution;
use larch::testing::LoopbackRouter;
use larch::testing::LoopbackSubstrate;
use tokio::task::JoinSet;

/// Build one engine per vertex of the edge list, wired through a fresh
/// loopback router.
pub fn build_engines(edges: &[(u64, u64, u64)]) -> Vec<Engine<LoopbackSubstrate>> {
    let mut adjacency: BTreeMap<u64, Vec<NeighbourEntry>> = BTreeMap::new();
    for &(a, b, weight) in edges {
        adjacency.entry(a).or_default().push(NeighbourEntry {
            id: b,
            address: format!("node-{b}"),
            edge_weight: weight,
        });
        adjacency.entry(b).or_default().push(NeighbourEntry {
            id: a,
            address: format!("node-{a}"),
            edge_weight: weight,
        });
    }

    let router = LoopbackRouter::new();
    adjacency
        .into_iter()
        .map(|(id, neighbours)| {
            let config = NodeConfig {
                id,
                address: format!("node-{id}"),
                neighbours,
            };
            let substrate = router.attach(id);
            Engine::new(config.table(), substrate)
        })
        .collect()
}

/// Run the protocol over the edge list and aggregate the tree.
pub async fn run_graph(edges: &[(u64, u64, u64)]) -> MstSummary {
    larch::harness::run_cluster(build_engines(edges))
        .await
        .expect("cluster run failed")
}

/// Run the protocol and hand back the finished engines too, so tests
/// can inspect final edge classifications.
pub async fn run_graph_with_engines(
    edges: &[(u64, u64, u64)],
) -> (MstSummary, BTreeMap<u64, Engine<LoopbackSubstrate>>) {
    let mut set = JoinSet::new();
    for mut engine in build_engines(edges) {
        set.spawn(async move {
            let contribution = engine.run().await.expect("engine failed");
            (contribution, engine)
        });
    }

    let mut contributions: Vec<MstContribution> = Vec::new();
    let mut engines = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        let (contribution, engine) = joined.expect("engine task panicked");
        contributions.push(contribution);
        engines.insert(engine.vertex(), engine);
    }

    let summary = MstSummary::from_contributions(contributions).expect("core identification failed");
    (summary, engines)
}

/// Reference MST: Kruskal with union-find, returning the ascending
/// weights of the chosen edges.
pub fn kruskal_weights(edges: &[(u64, u64, u64)]) -> Vec<u64> {
    fn find(parent: &mut BTreeMap<u64, u64>, x: u64) -> u64 {
        let p = parent[&x];
        if p == x {
            return x;
        }
        let root = find(parent, p);
        parent.insert(x, root);
        root
    }

    let mut parent: BTreeMap<u64, u64> = BTreeMap::new();
    for &(a, b, _) in edges {
        parent.insert(a, a);
        parent.insert(b, b);
    }

    let mut sorted: Vec<(u64, u64, u64)> = edges.to_vec();
    sorted.sort_by_key(|&(_, _, w)| w);

    let mut weights = Vec::new();
    for (a, b, w) in sorted {
        let root_a = find(&mut parent, a);
        let root_b = find(&mut parent, b);
        if root_a != root_b {
            parent.insert(root_a, root_b);
            weights.push(w);
        }
    }
    weights
}

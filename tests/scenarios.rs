//! End-to-end protocol runs over the in-process router.
//!
//! Each test runs one engine per vertex of a fixed graph to termination
//! and checks the aggregated tree, and where it matters, the final edge
//! classifications on both endpoints.

mod support;

use larch::edge::EdgeState;
use support::run_graph;
use support::run_graph_with_engines;

#[tokio::test]
async fn two_vertex_graph() {
    let summary = run_graph(&[(1, 2, 5)]).await;
    assert_eq!(summary.weights(), vec![5]);
    assert_eq!(summary.core_weight(), 5);
    assert_eq!(summary.core_vertex(), 1);
}

#[tokio::test]
async fn triangle_rejects_the_heaviest_edge() {
    let edges = [(1, 2, 1), (2, 3, 2), (1, 3, 3)];
    let (summary, engines) = run_graph_with_engines(&edges).await;
    assert_eq!(summary.weights(), vec![1, 2]);

    // The weight-3 edge connects two vertices of the same fragment and
    // ends rejected at both endpoints.
    assert_eq!(engines[&1].edges().state(3).unwrap(), EdgeState::Rejected);
    assert_eq!(engines[&3].edges().state(1).unwrap(), EdgeState::Rejected);
}

#[tokio::test]
async fn four_vertex_line() {
    // 1 -10- 2 -1- 3 -5- 4: vertices 2 and 3 form the first fragment,
    // absorptions extend it to 1 and 4.
    let summary = run_graph(&[(1, 2, 10), (2, 3, 1), (3, 4, 5)]).await;
    assert_eq!(summary.weights(), vec![1, 5, 10]);
    assert_eq!(summary.core_weight(), 1);
}

#[tokio::test]
async fn star_keeps_every_leaf_edge() {
    let edges = [(1, 2, 1), (1, 3, 2), (1, 4, 3), (1, 5, 4)];
    let (summary, engines) = run_graph_with_engines(&edges).await;
    assert_eq!(summary.weights(), vec![1, 2, 3, 4]);

    // Every leaf edge is in the tree, classified branch on both ends.
    for leaf in 2..=5 {
        assert_eq!(
            engines[&1].edges().state(leaf).unwrap(),
            EdgeState::Branch,
            "centre side of edge to {leaf}"
        );
        assert_eq!(
            engines[&leaf].edges().state(1).unwrap(),
            EdgeState::Branch,
            "leaf side of edge from {leaf}"
        );
    }
}

#[tokio::test]
async fn k4_equal_level_merge() {
    // Complete graph on four vertices. Vertices 1 and 2 both pick edge
    // 1-2 as their minimum, so both send Connect at level 0 over it and
    // the fragments merge one level up.
    let edges = [
        (1, 2, 1),
        (1, 3, 2),
        (1, 4, 3),
        (2, 3, 4),
        (2, 4, 5),
        (3, 4, 6),
    ];
    let (summary, engines) = run_graph_with_engines(&edges).await;
    assert_eq!(summary.weights(), vec![1, 2, 3]);
    assert_eq!(summary.core_weight(), 1);

    // Branch classification is symmetric on every tree edge.
    for &(a, b, _) in &[(1u64, 2u64, 1u64), (1, 3, 2), (1, 4, 3)] {
        assert_eq!(engines[&a].edges().state(b).unwrap(), EdgeState::Branch);
        assert_eq!(engines[&b].edges().state(a).unwrap(), EdgeState::Branch);
    }
}

#[tokio::test]
async fn connect_racing_a_merge_is_eventually_absorbed() {
    // Vertices 2 and 3 pick each other (weight 1) and merge; vertex 1's
    // Connect over the weight-2 edge races their Initiate exchange and
    // must wait in the receiver's mailbox until the merge completes.
    let summary = run_graph(&[(1, 2, 2), (2, 3, 1), (1, 3, 4)]).await;
    assert_eq!(summary.weights(), vec![1, 2]);
    assert_eq!(summary.core_weight(), 1);
}

#[tokio::test]
async fn repeated_runs_build_the_same_tree() {
    let edges = [
        (1, 2, 7),
        (1, 3, 12),
        (2, 3, 3),
        (2, 4, 9),
        (3, 5, 4),
        (4, 5, 2),
        (1, 5, 15),
    ];
    let first = run_graph(&edges).await;
    let second = run_graph(&edges).await;
    assert_eq!(first.weights(), second.weights());
    assert_eq!(first.core_weight(), second.core_weight());
    assert_eq!(first.weights(), support::kruskal_weights(&edges));
}

#[tokio::test]
async fn summary_counts_match_the_graph() {
    let edges = [(1, 2, 4), (2, 3, 8), (3, 4, 6), (4, 1, 11), (1, 3, 20)];
    let summary = run_graph(&edges).await;

    // A spanning tree over n vertices has n - 1 edges, and the core
    // weight appears exactly once after de-duplication.
    assert_eq!(summary.edges().len(), 3);
    let core_count = summary
        .weights()
        .iter()
        .filter(|&&w| w == summary.core_weight())
        .count();
    assert_eq!(core_count, 1);
}

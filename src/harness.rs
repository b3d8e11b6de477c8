//! Cluster harness: run every engine, aggregate the tree.
//!
//! Each engine's final contribution is the weight of the edge to its
//! parent. The core edge is the only edge that is a parent edge for both
//! of its endpoints, so its weight is the single value present exactly
//! twice in the collection; the harness de-duplicates it and labels one
//! endpoint the core root.
//!
//! Running every engine inside one process is a demonstration
//! convenience; nothing in the engine depends on colocation.

use std::collections::BTreeMap;

use snafu::ResultExt;
use snafu::Snafu;
use tokio::task::JoinSet;
use tracing::info;

use crate::engine::Engine;
use crate::engine::EngineError;
use crate::engine::MstContribution;
use crate::transport::Substrate;
use crate::types::VertexId;
use crate::types::Weight;

/// Errors from aggregating a cluster run.
#[derive(Debug, Snafu)]
pub enum HarnessError {
    /// An engine failed.
    #[snafu(display("engine for vertex {vertex} failed: {source}"))]
    Engine {
        /// The failing vertex.
        vertex: VertexId,
        /// The engine's error.
        source: EngineError,
    },

    /// An engine task panicked or was cancelled.
    #[snafu(display("engine task failed: {source}"))]
    Join {
        /// Underlying join error.
        source: tokio::task::JoinError,
    },

    /// No weight appeared exactly twice; the core edge cannot be found.
    #[snafu(display("no core edge: no weight appears exactly twice"))]
    NoCoreEdge,

    /// More than one candidate core weight; the contributions are not a
    /// valid GHS outcome.
    #[snafu(display("ambiguous core edge: weight {weight} appears {count} times"))]
    AmbiguousCore {
        /// The offending weight.
        weight: Weight,
        /// How many contributions carried it.
        count: usize,
    },
}

/// Aggregated result of a full cluster run.
#[derive(Debug, Clone)]
pub struct MstSummary {
    core_vertex: VertexId,
    core_weight: Weight,
    edges: Vec<MstContribution>,
}

impl MstSummary {
    /// Identify the core edge among the per-engine contributions and
    /// de-duplicate it.
    ///
    /// With distinct edge weights every tree edge is contributed once
    /// per child endpoint; only the core edge is contributed by both of
    /// its endpoints. The contribution kept for the core edge is the
    /// endpoint with the smaller vertex id, labelled the core root.
    pub fn from_contributions(
        contributions: Vec<MstContribution>,
    ) -> Result<Self, HarnessError> {
        let mut by_weight: BTreeMap<Weight, Vec<VertexId>> = BTreeMap::new();
        for contribution in &contributions {
            by_weight
                .entry(contribution.weight)
                .or_default()
                .push(contribution.vertex);
        }

        let mut core = None;
        for (&weight, vertices) in &by_weight {
            match vertices.len() {
                1 => {}
                2 if core.is_none() => core = Some((weight, vertices[0].min(vertices[1]))),
                count => {
                    return Err(HarnessError::AmbiguousCore { weight, count });
                }
            }
        }
        let (core_weight, core_vertex) = core.ok_or(HarnessError::NoCoreEdge)?;

        let mut edges: Vec<MstContribution> = contributions
            .into_iter()
            .filter(|c| !(c.weight == core_weight && c.vertex != core_vertex))
            .collect();
        edges.sort_by_key(|c| c.weight);

        Ok(Self {
            core_vertex,
            core_weight,
            edges,
        })
    }

    /// The endpoint of the core edge labelled as root.
    pub fn core_vertex(&self) -> VertexId {
        self.core_vertex
    }

    /// Weight of the core edge.
    pub fn core_weight(&self) -> Weight {
        self.core_weight
    }

    /// The de-duplicated tree edges, ascending by weight.
    pub fn edges(&self) -> &[MstContribution] {
        &self.edges
    }

    /// The tree's edge weights, ascending.
    pub fn weights(&self) -> Vec<Weight> {
        self.edges.iter().map(|c| c.weight).collect()
    }

    /// Sum of the tree's edge weights.
    pub fn total_weight(&self) -> Weight {
        self.edges.iter().map(|c| c.weight).sum()
    }

    /// Human-readable listing of the tree, core root marked.
    pub fn render(&self) -> String {
        let mut out = format!(
            "minimum spanning tree: {} edges, total weight {}\n",
            self.edges.len(),
            self.total_weight()
        );
        for contribution in &self.edges {
            if contribution.vertex == self.core_vertex {
                out.push_str(&format!(
                    "  {}  (vertex {}, core root)\n",
                    contribution.weight, contribution.vertex
                ));
            } else {
                out.push_str(&format!(
                    "  {}  (vertex {})\n",
                    contribution.weight, contribution.vertex
                ));
            }
        }
        out
    }
}

/// Run one engine per vertex to completion and aggregate the tree.
pub async fn run_cluster<S>(engines: Vec<Engine<S>>) -> Result<MstSummary, HarnessError>
where
    S: Substrate + Sync + 'static,
{
    let mut set = JoinSet::new();
    for mut engine in engines {
        set.spawn(async move {
            let vertex = engine.vertex();
            (vertex, engine.run().await)
        });
    }

    let mut contributions = Vec::new();
    while let Some(joined) = set.join_next().await {
        let (vertex, result) = joined.context(JoinSnafu)?;
        contributions.push(result.context(EngineSnafu { vertex })?);
    }
    info!(engines = contributions.len(), "cluster run complete");
    MstSummary::from_contributions(contributions)
}

//! Core identifiers shared across the crate.
//!
//! Vertices are named by a stable integer unique within the run. Edge
//! weights are positive integers, distinct across the whole graph; a
//! fragment's identity is the weight of its core edge, so weight values
//! double as fragment identifiers on the wire.

/// Stable identifier of a graph vertex, unique within a run.
pub type VertexId = u64;

/// Positive integer weight of an undirected edge.
///
/// Weights must be distinct across the graph. The maximum value is
/// reserved as the "no outgoing edge" sentinel carried by `Report`.
pub type Weight = u64;

/// Sentinel weight meaning "no outgoing edge found" (+infinity).
///
/// A fragment whose minimum outgoing weight converges to this value spans
/// the entire graph, which is the protocol's termination condition.
pub const INFINITE_WEIGHT: Weight = u64::MAX;

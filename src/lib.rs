//! Distributed minimum spanning tree construction.
//!
//! Larch runs the Gallager-Humblet-Spira (GHS) protocol: one autonomous
//! engine per graph vertex, no shared memory, no coordinator. Each engine
//! knows only its own incident edges and their weights and exchanges typed
//! point-to-point messages with its direct neighbours over a reliable,
//! per-edge-FIFO substrate. When the protocol terminates, the union of
//! edges each engine marked `Branch` is the minimum spanning tree of the
//! input graph. Edge weights must be positive and distinct across the
//! graph; the MST is then unique and the run is deterministic.
//!
//! # Architecture
//!
//! ```text
//! neighbour table (TOML)          neighbour table (TOML)
//!         |                               |
//!         v                               v
//!   +-----------+    Connect/Test/  +-----------+
//!   |  Engine 1 | <---------------> |  Engine 2 |   ... one per vertex
//!   +-----------+    Report/...     +-----------+
//!         |                               |
//!         +---------- Substrate ----------+
//!            (TCP, or in-process loopback)
//!         |                               |
//!         +----------- Harness -----------+
//!              collects MST contributions
//! ```
//!
//! The engine is single-threaded with respect to its own state: it handles
//! one message at a time, to completion, and the only suspension point is
//! the substrate receive. Messages whose local precondition is not yet met
//! are re-queued behind later arrivals rather than dropped.

#![warn(missing_docs)]

/// Per-vertex neighbour tables loaded from TOML documents.
pub mod config;
/// Per-edge classification (`Basic`/`Branch`/`Rejected`) with enforced monotonicity.
pub mod edge;
/// The GHS protocol engine: state machine, handlers, deferral mailbox.
pub mod engine;
/// Cluster harness: spawns engines, aggregates MST contributions.
pub mod harness;
/// Deterministic in-process substrate for tests.
pub mod testing;
/// Messaging substrate trait and the TCP implementation.
pub mod transport;
/// Vertex identifiers and edge weights.
pub mod types;
/// Message taxonomy and the newline-terminated wire codec.
pub mod wire;

pub use config::NeighbourTable;
pub use config::NodeConfig;
pub use engine::Engine;
pub use engine::MstContribution;
pub use harness::MstSummary;
pub use transport::Substrate;
pub use types::VertexId;
pub use types::Weight;
pub use wire::Message;

//! Edge classification state.
//!
//! Every incident edge is in exactly one state. `Basic` is the initial
//! state; `Branch` (the edge is in the tree) and `Rejected` (the edge
//! provably is not) are terminal. The map enforces the monotonicity:
//! re-asserting the current state is a no-op, crossing between terminal
//! states is a defect.
//!
//! No locking: the owning engine handles one message at a time.

use std::collections::BTreeMap;
use std::fmt;

use snafu::Snafu;

use crate::config::NeighbourTable;
use crate::types::VertexId;
use crate::types::Weight;

/// Classification of one incident edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeState {
    /// Not yet classified.
    Basic,
    /// Belongs to the tree (or to a fragment's tree).
    Branch,
    /// Connects two vertices of the same fragment; not in the tree.
    Rejected,
}

impl fmt::Display for EdgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeState::Basic => f.write_str("Basic"),
            EdgeState::Branch => f.write_str("Branch"),
            EdgeState::Rejected => f.write_str("Rejected"),
        }
    }
}

/// Errors from consulting or mutating the edge state map.
#[derive(Debug, Snafu)]
pub enum EdgeError {
    /// The named vertex is not an incident edge's far endpoint.
    #[snafu(display("no incident edge to vertex {vertex}"))]
    UnknownEdge {
        /// The unknown endpoint.
        vertex: VertexId,
    },

    /// An edge was asked to leave a terminal state.
    #[snafu(display("edge to {vertex} cannot move {from} -> {to}"))]
    InvalidTransition {
        /// Far endpoint of the edge.
        vertex: VertexId,
        /// Current state.
        from: EdgeState,
        /// Requested state.
        to: EdgeState,
    },
}

/// Mutable classification of every incident edge of one vertex.
#[derive(Debug, Clone)]
pub struct EdgeStateMap {
    states: BTreeMap<VertexId, EdgeState>,
}

impl EdgeStateMap {
    /// Create a map with every edge of `table` classified `Basic`.
    pub fn new(table: &NeighbourTable) -> Self {
        Self {
            states: table.peers().map(|peer| (peer, EdgeState::Basic)).collect(),
        }
    }

    /// Current state of the edge to `peer`.
    pub fn state(&self, peer: VertexId) -> Result<EdgeState, EdgeError> {
        self.states
            .get(&peer)
            .copied()
            .ok_or(EdgeError::UnknownEdge { vertex: peer })
    }

    /// Classify the edge to `peer` as `Branch`.
    pub fn mark_branch(&mut self, peer: VertexId) -> Result<(), EdgeError> {
        self.transition(peer, EdgeState::Branch)
    }

    /// Classify the edge to `peer` as `Rejected`.
    pub fn mark_rejected(&mut self, peer: VertexId) -> Result<(), EdgeError> {
        self.transition(peer, EdgeState::Rejected)
    }

    fn transition(&mut self, peer: VertexId, to: EdgeState) -> Result<(), EdgeError> {
        let state = self
            .states
            .get_mut(&peer)
            .ok_or(EdgeError::UnknownEdge { vertex: peer })?;
        match *state {
            EdgeState::Basic => {
                *state = to;
                Ok(())
            }
            from if from == to => Ok(()),
            from => Err(EdgeError::InvalidTransition {
                vertex: peer,
                from,
                to,
            }),
        }
    }

    /// Every edge currently in `state`, in neighbour-id order.
    pub fn edges_in(&self, state: EdgeState) -> Vec<VertexId> {
        self.states
            .iter()
            .filter(|&(_, s)| *s == state)
            .map(|(&peer, _)| peer)
            .collect()
    }

    /// The minimum-weight edge still classified `Basic`, if any.
    pub fn min_basic_edge(&self, table: &NeighbourTable) -> Option<(VertexId, Weight)> {
        table
            .iter()
            .filter(|&(peer, _)| self.states.get(&peer) == Some(&EdgeState::Basic))
            .min_by_key(|&(_, weight)| weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;

    fn table() -> NeighbourTable {
        NodeConfig::from_toml_str(
            r#"
            id = 1
            address = "a"

            [[neighbours]]
            id = 2
            address = "b"
            edge_weight = 7

            [[neighbours]]
            id = 3
            address = "c"
            edge_weight = 2
        "#,
        )
        .unwrap()
        .table()
    }

    #[test]
    fn all_edges_start_basic() {
        let map = EdgeStateMap::new(&table());
        assert_eq!(map.state(2).unwrap(), EdgeState::Basic);
        assert_eq!(map.state(3).unwrap(), EdgeState::Basic);
        assert_eq!(map.edges_in(EdgeState::Basic), vec![2, 3]);
    }

    #[test]
    fn branch_and_rejected_are_terminal() {
        let mut map = EdgeStateMap::new(&table());
        map.mark_branch(2).unwrap();
        map.mark_rejected(3).unwrap();

        // Re-asserting the current state is a no-op.
        map.mark_branch(2).unwrap();
        map.mark_rejected(3).unwrap();

        assert!(matches!(
            map.mark_rejected(2),
            Err(EdgeError::InvalidTransition {
                vertex: 2,
                from: EdgeState::Branch,
                to: EdgeState::Rejected,
            })
        ));
        assert!(matches!(
            map.mark_branch(3),
            Err(EdgeError::InvalidTransition { vertex: 3, .. })
        ));
    }

    #[test]
    fn min_basic_edge_tracks_classification() {
        let t = table();
        let mut map = EdgeStateMap::new(&t);
        assert_eq!(map.min_basic_edge(&t), Some((3, 2)));

        map.mark_rejected(3).unwrap();
        assert_eq!(map.min_basic_edge(&t), Some((2, 7)));

        map.mark_branch(2).unwrap();
        assert_eq!(map.min_basic_edge(&t), None);
    }

    #[test]
    fn unknown_edge_is_fatal() {
        let mut map = EdgeStateMap::new(&table());
        assert!(matches!(
            map.mark_branch(9),
            Err(EdgeError::UnknownEdge { vertex: 9 })
        ));
    }
}

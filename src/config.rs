//! Per-vertex neighbour descriptions.
//!
//! Each vertex is configured by one TOML document naming the vertex and
//! every incident edge:
//!
//! ```toml
//! id = 1
//! address = "127.0.0.1"
//!
//! [[neighbours]]
//! id = 2
//! address = "127.0.0.2"
//! edge_weight = 4
//! ```
//!
//! The document is parsed and validated once at startup and never mutated
//! afterwards. Validation fails fast: a vertex with a malformed table is a
//! deployment defect, not a runtime condition.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;
use tracing::debug;

use crate::types::INFINITE_WEIGHT;
use crate::types::VertexId;
use crate::types::Weight;

/// Errors from loading or consulting a neighbour description.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// The neighbour file could not be read.
    #[snafu(display("failed to read neighbour file {path:?}: {source}"))]
    ReadFile {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The document was not valid TOML for a neighbour description.
    #[snafu(display("failed to parse neighbour description: {source}"))]
    Parse {
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// The vertex listed no neighbours; the graph cannot be connected.
    #[snafu(display("vertex {vertex} has no neighbours"))]
    NoNeighbours {
        /// The isolated vertex.
        vertex: VertexId,
    },

    /// An edge weight was zero or the reserved infinity sentinel.
    #[snafu(display("edge to {neighbour} has invalid weight {weight}"))]
    InvalidWeight {
        /// Far endpoint of the offending edge.
        neighbour: VertexId,
        /// The rejected weight.
        weight: Weight,
    },

    /// The same neighbour id appeared twice.
    #[snafu(display("duplicate neighbour id {neighbour}"))]
    DuplicateNeighbour {
        /// The repeated neighbour id.
        neighbour: VertexId,
    },

    /// The same neighbour address appeared twice.
    #[snafu(display("duplicate neighbour address {address:?}"))]
    DuplicateAddress {
        /// The repeated address.
        address: String,
    },

    /// Two incident edges carried the same weight; fragment identities
    /// are weights, so weights must be distinct.
    #[snafu(display("duplicate edge weight {weight}"))]
    DuplicateWeight {
        /// The repeated weight.
        weight: Weight,
    },

    /// The vertex listed itself as a neighbour.
    #[snafu(display("vertex {vertex} lists itself as a neighbour"))]
    SelfEdge {
        /// The offending vertex.
        vertex: VertexId,
    },

    /// A weight lookup named a vertex that is not a neighbour.
    #[snafu(display("vertex {vertex} is not a neighbour"))]
    UnknownNeighbour {
        /// The unknown vertex.
        vertex: VertexId,
    },
}

/// One incident edge in a neighbour description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighbourEntry {
    /// Identity of the far endpoint.
    pub id: VertexId,
    /// Network address of the far endpoint.
    pub address: String,
    /// Weight of the edge.
    pub edge_weight: Weight,
}

/// Static description of one vertex: its identity, its address, and
/// every incident edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity of this vertex, unique within the run.
    pub id: VertexId,
    /// Network address this vertex's substrate binds and dials from.
    pub address: String,
    /// Incident edges.
    pub neighbours: Vec<NeighbourEntry>,
}

impl NodeConfig {
    /// Load and validate a neighbour description from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        let config = Self::from_toml_str(&contents)?;
        debug!(vertex = config.id, path = %path.display(), degree = config.neighbours.len(), "loaded neighbour table");
        Ok(config)
    }

    /// Parse and validate a neighbour description from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(contents).context(ParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.neighbours.is_empty() {
            return Err(ConfigError::NoNeighbours { vertex: self.id });
        }

        let mut ids = BTreeSet::new();
        let mut addresses = BTreeSet::new();
        let mut weights = BTreeSet::new();
        for entry in &self.neighbours {
            if entry.id == self.id {
                return Err(ConfigError::SelfEdge { vertex: self.id });
            }
            if entry.edge_weight == 0 || entry.edge_weight >= INFINITE_WEIGHT {
                return Err(ConfigError::InvalidWeight {
                    neighbour: entry.id,
                    weight: entry.edge_weight,
                });
            }
            if !ids.insert(entry.id) {
                return Err(ConfigError::DuplicateNeighbour {
                    neighbour: entry.id,
                });
            }
            if !addresses.insert(entry.address.as_str()) {
                return Err(ConfigError::DuplicateAddress {
                    address: entry.address.clone(),
                });
            }
            if !weights.insert(entry.edge_weight) {
                return Err(ConfigError::DuplicateWeight {
                    weight: entry.edge_weight,
                });
            }
        }
        Ok(())
    }

    /// Build the immutable lookup table the engine and substrate consume.
    pub fn table(&self) -> NeighbourTable {
        let neighbours = self
            .neighbours
            .iter()
            .map(|entry| {
                (
                    entry.id,
                    Neighbour {
                        address: entry.address.clone(),
                        weight: entry.edge_weight,
                    },
                )
            })
            .collect();
        NeighbourTable {
            id: self.id,
            address: self.address.clone(),
            neighbours,
        }
    }
}

#[derive(Debug, Clone)]
struct Neighbour {
    address: String,
    weight: Weight,
}

/// Immutable per-vertex map from neighbour identity to edge weight and
/// address. Populated once at startup; size is the vertex degree.
#[derive(Debug, Clone)]
pub struct NeighbourTable {
    id: VertexId,
    address: String,
    neighbours: BTreeMap<VertexId, Neighbour>,
}

impl NeighbourTable {
    /// Identity of the vertex this table belongs to.
    pub fn id(&self) -> VertexId {
        self.id
    }

    /// Network address of the vertex this table belongs to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Number of incident edges.
    pub fn degree(&self) -> usize {
        self.neighbours.len()
    }

    /// Weight of the edge to `peer`. A lookup for a vertex that is not a
    /// neighbour indicates a protocol or deployment defect and is fatal.
    pub fn weight(&self, peer: VertexId) -> Result<Weight, ConfigError> {
        self.neighbours
            .get(&peer)
            .map(|n| n.weight)
            .ok_or(ConfigError::UnknownNeighbour { vertex: peer })
    }

    /// Address of the neighbour `peer`.
    pub fn peer_address(&self, peer: VertexId) -> Result<&str, ConfigError> {
        self.neighbours
            .get(&peer)
            .map(|n| n.address.as_str())
            .ok_or(ConfigError::UnknownNeighbour { vertex: peer })
    }

    /// The incident edge of minimum weight, if the vertex has any
    /// neighbours at all.
    pub fn min_weight_neighbour(&self) -> Option<(VertexId, Weight)> {
        self.iter().min_by_key(|&(_, weight)| weight)
    }

    /// Iterate over `(neighbour, weight)` pairs in neighbour-id order.
    pub fn iter(&self) -> impl Iterator<Item = (VertexId, Weight)> + '_ {
        self.neighbours.iter().map(|(&id, n)| (id, n.weight))
    }

    /// Iterate over neighbour identities in id order.
    pub fn peers(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.neighbours.keys().copied()
    }

    /// Iterate over `(neighbour, address)` pairs in neighbour-id order.
    pub fn addresses(&self) -> impl Iterator<Item = (VertexId, &str)> + '_ {
        self.neighbours.iter().map(|(&id, n)| (id, n.address.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
        id = 1
        address = "127.0.0.1"

        [[neighbours]]
        id = 2
        address = "127.0.0.2"
        edge_weight = 4

        [[neighbours]]
        id = 3
        address = "127.0.0.3"
        edge_weight = 9
    "#;

    #[test]
    fn parses_and_indexes_a_table() {
        let config = NodeConfig::from_toml_str(DOC).unwrap();
        assert_eq!(config.id, 1);
        assert_eq!(config.address, "127.0.0.1");

        let table = config.table();
        assert_eq!(table.degree(), 2);
        assert_eq!(table.weight(2).unwrap(), 4);
        assert_eq!(table.weight(3).unwrap(), 9);
        assert_eq!(table.peer_address(3).unwrap(), "127.0.0.3");
        assert_eq!(table.min_weight_neighbour(), Some((2, 4)));
    }

    #[test]
    fn unknown_neighbour_lookup_is_fatal() {
        let table = NodeConfig::from_toml_str(DOC).unwrap().table();
        assert!(matches!(
            table.weight(42),
            Err(ConfigError::UnknownNeighbour { vertex: 42 })
        ));
    }

    #[test]
    fn rejects_empty_neighbour_list() {
        let doc = r#"
            id = 1
            address = "127.0.0.1"
            neighbours = []
        "#;
        assert!(matches!(
            NodeConfig::from_toml_str(doc),
            Err(ConfigError::NoNeighbours { vertex: 1 })
        ));
    }

    #[test]
    fn rejects_zero_weight() {
        let doc = r#"
            id = 1
            address = "127.0.0.1"

            [[neighbours]]
            id = 2
            address = "127.0.0.2"
            edge_weight = 0
        "#;
        assert!(matches!(
            NodeConfig::from_toml_str(doc),
            Err(ConfigError::InvalidWeight { neighbour: 2, .. })
        ));
    }

    #[test]
    fn rejects_duplicate_weight() {
        let doc = r#"
            id = 1
            address = "127.0.0.1"

            [[neighbours]]
            id = 2
            address = "127.0.0.2"
            edge_weight = 4

            [[neighbours]]
            id = 3
            address = "127.0.0.3"
            edge_weight = 4
        "#;
        assert!(matches!(
            NodeConfig::from_toml_str(doc),
            Err(ConfigError::DuplicateWeight { weight: 4 })
        ));
    }

    #[test]
    fn rejects_self_edge() {
        let doc = r#"
            id = 1
            address = "127.0.0.1"

            [[neighbours]]
            id = 1
            address = "127.0.0.1"
            edge_weight = 3
        "#;
        assert!(matches!(
            NodeConfig::from_toml_str(doc),
            Err(ConfigError::SelfEdge { vertex: 1 })
        ));
    }

    #[test]
    fn rejects_garbage_toml() {
        assert!(matches!(
            NodeConfig::from_toml_str("not = [valid"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn loads_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node-1.toml");
        std::fs::write(&path, DOC).unwrap();

        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.id, 1);
        assert_eq!(config.neighbours.len(), 2);

        assert!(matches!(
            NodeConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::ReadFile { .. })
        ));
    }
}

//! The per-vertex GHS protocol engine.
//!
//! One engine runs at every vertex. After a spontaneous wakeup it joins
//! the smallest incident edge, then reacts to inbound messages until the
//! protocol terminates: fragments discover their minimum outgoing edge
//! with `Test`/`Accept`/`Reject`, convergecast it with `Report`, and grow
//! by `Connect`ing over it, absorbing lower-level fragments outright and
//! merging with equal-level ones into a fragment one level higher whose
//! identity is the weight of the connecting edge. A fragment whose
//! minimum outgoing weight converges to infinity spans the whole graph;
//! its engines broadcast `Stop` and exit.
//!
//! The engine is single-threaded over its own state: one message at a
//! time, each handler to completion, the substrate receive being the only
//! suspension point. A message whose precondition is not yet met (a
//! `Connect` racing its own `Initiate`, a `Test` from a higher level, a
//! parent's `Report` while this vertex is still finding) is deferred:
//! re-queued behind later arrivals and retried once newer messages have
//! had the chance to advance local state.

use std::collections::VecDeque;

use snafu::OptionExt;
use snafu::ResultExt;
use snafu::Snafu;
use tracing::debug;
use tracing::trace;

use crate::config::ConfigError;
use crate::config::NeighbourTable;
use crate::edge::EdgeError;
use crate::edge::EdgeState;
use crate::edge::EdgeStateMap;
use crate::transport::Envelope;
use crate::transport::Substrate;
use crate::transport::TransportError;
use crate::types::INFINITE_WEIGHT;
use crate::types::VertexId;
use crate::types::Weight;
use crate::wire::Message;
use crate::wire::SearchState;

/// Errors that abort an engine run.
///
/// Every variant signals a violated protocol assumption or a broken
/// deployment; none of them is recoverable at this layer.
#[derive(Debug, Snafu)]
pub enum EngineError {
    /// The substrate failed.
    #[snafu(display("transport failure: {source}"))]
    Transport {
        /// Underlying transport error.
        source: TransportError,
    },

    /// A neighbour-table lookup failed.
    #[snafu(display("neighbour lookup failed: {source}"))]
    Lookup {
        /// Underlying table error.
        source: ConfigError,
    },

    /// An edge classification failed.
    #[snafu(display("edge classification failed: {source}"))]
    Edge {
        /// Underlying edge-map error.
        source: EdgeError,
    },

    /// The vertex has no incident edges; the graph cannot be connected.
    #[snafu(display("vertex {vertex} has no incident edges"))]
    Isolated {
        /// The isolated vertex.
        vertex: VertexId,
    },

    /// A handler needed the fragment identity before any `Initiate` set it.
    #[snafu(display("fragment identity needed before the first Initiate"))]
    NoFragment,

    /// The report procedure ran before any `Initiate` set a parent.
    #[snafu(display("report ran with no parent edge"))]
    NoParent,

    /// Change-root ran without a best outgoing edge on record.
    #[snafu(display("change-root ran with no best edge on record"))]
    NoBestEdge,

    /// A subordinate `Report` arrived with no outstanding find.
    #[snafu(display("unexpected Report from vertex {from}"))]
    UnexpectedReport {
        /// The reporting vertex.
        from: VertexId,
    },
}

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Pre-wakeup; entered only once.
    Sleeping,
    /// Running a minimum-outgoing-edge round.
    Find,
    /// Quiescent or reporting; alternates with `Find` once awake.
    Found,
}

/// An engine's final contribution to the tree: the weight of the edge
/// toward its parent. The two core endpoints contribute the same weight,
/// which is how the harness identifies the core root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MstContribution {
    /// The contributing vertex.
    pub vertex: VertexId,
    /// Weight of the vertex's parent edge.
    pub weight: Weight,
}

/// Whether a handler consumed its message or asked for it to be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Handled,
    Deferred,
}

/// The GHS state machine for one vertex.
pub struct Engine<S: Substrate> {
    id: VertexId,
    table: NeighbourTable,
    substrate: S,
    edges: EdgeStateMap,

    status: EngineStatus,
    level: u64,
    fragment: Option<Weight>,
    parent: Option<VertexId>,
    best_edge: Option<VertexId>,
    best_weight: Weight,
    test_edge: Option<VertexId>,
    find_count: u64,
    terminated: bool,

    mailbox: VecDeque<Envelope>,
    deferrals: usize,
}

impl<S: Substrate> Engine<S> {
    /// Create an engine for the vertex described by `table`, speaking
    /// over `substrate`.
    pub fn new(table: NeighbourTable, substrate: S) -> Self {
        let edges = EdgeStateMap::new(&table);
        Self {
            id: table.id(),
            table,
            substrate,
            edges,
            status: EngineStatus::Sleeping,
            level: 0,
            fragment: None,
            parent: None,
            best_edge: None,
            best_weight: INFINITE_WEIGHT,
            test_edge: None,
            find_count: 0,
            terminated: false,
            mailbox: VecDeque::new(),
            deferrals: 0,
        }
    }

    /// Identity of this engine's vertex.
    pub fn vertex(&self) -> VertexId {
        self.id
    }

    /// Current classification of every incident edge.
    pub fn edges(&self) -> &EdgeStateMap {
        &self.edges
    }

    /// Run the protocol to termination and return this vertex's
    /// contribution to the tree.
    pub async fn run(&mut self) -> Result<MstContribution, EngineError> {
        self.wake_up().await?;
        while !self.terminated {
            let envelope = self.next_envelope().await?;
            self.dispatch(envelope).await?;
        }
        self.stop_sweep().await?;

        let parent = self.parent.context(NoParentSnafu)?;
        let weight = self.table.weight(parent).context(LookupSnafu)?;
        debug!(vertex = self.id, parent, weight, "engine finished");
        Ok(MstContribution {
            vertex: self.id,
            weight,
        })
    }

    /// Spontaneous wakeup: join the minimum-weight incident edge.
    async fn wake_up(&mut self) -> Result<(), EngineError> {
        let (peer, weight) = self
            .table
            .min_weight_neighbour()
            .context(IsolatedSnafu { vertex: self.id })?;
        self.edges.mark_branch(peer).context(EdgeSnafu)?;
        self.level = 0;
        self.status = EngineStatus::Found;
        self.find_count = 0;
        debug!(vertex = self.id, to = peer, weight, "woke up");
        self.send(peer, Message::Connect { level: 0 }).await
    }

    /// Next message to handle: the mailbox front, topped up from the
    /// substrate whenever every queued message has already been retried
    /// since the last arrival. Deferred messages therefore spin only
    /// once per newer arrival, and none is ever lost.
    async fn next_envelope(&mut self) -> Result<Envelope, EngineError> {
        loop {
            if self.deferrals < self.mailbox.len() {
                if let Some(envelope) = self.mailbox.pop_front() {
                    return Ok(envelope);
                }
            }
            let envelope = self.substrate.recv().await.context(TransportSnafu)?;
            self.mailbox.push_back(envelope);
            self.deferrals = 0;
        }
    }

    async fn dispatch(&mut self, envelope: Envelope) -> Result<(), EngineError> {
        let Envelope { from, message } = envelope;
        trace!(vertex = self.id, from, kind = message.kind(), "handling");

        let disposition = match message {
            Message::Connect { level } => self.on_connect(from, level).await?,
            Message::Initiate {
                level,
                fragment,
                search,
            } => {
                self.on_initiate(from, level, fragment, search).await?;
                Disposition::Handled
            }
            Message::Test { level, fragment } => self.on_test(from, level, fragment).await?,
            Message::Accept => {
                self.on_accept(from).await?;
                Disposition::Handled
            }
            Message::Reject => {
                self.on_reject(from).await?;
                Disposition::Handled
            }
            Message::Report { weight } => self.on_report(from, weight).await?,
            Message::ChangeRoot => {
                self.run_change_root().await?;
                Disposition::Handled
            }
            Message::Stop => {
                debug!(vertex = self.id, from, "stopping on request");
                self.terminated = true;
                Disposition::Handled
            }
        };

        match disposition {
            Disposition::Handled => self.deferrals = 0,
            Disposition::Deferred => {
                trace!(vertex = self.id, from, kind = message.kind(), "deferred");
                self.mailbox.push_back(Envelope { from, message });
                self.deferrals += 1;
            }
        }
        Ok(())
    }

    /// `Connect(L)`: absorb a lower-level fragment, or merge with an
    /// equal-level one over an edge both sides chose.
    async fn on_connect(&mut self, from: VertexId, level: u64) -> Result<Disposition, EngineError> {
        if level < self.level {
            // The connecting fragment is smaller: absorb it as-is.
            self.edges.mark_branch(from).context(EdgeSnafu)?;
            let fragment = self.fragment.context(NoFragmentSnafu)?;
            let search = self.search_state();
            self.send(
                from,
                Message::Initiate {
                    level: self.level,
                    fragment,
                    search,
                },
            )
            .await?;
            if self.status == EngineStatus::Find {
                self.find_count += 1;
            }
            Ok(Disposition::Handled)
        } else if self.edges.state(from).context(EdgeSnafu)? == EdgeState::Basic {
            // Our level has not caught up with the sender's yet.
            Ok(Disposition::Deferred)
        } else {
            // Mutual connect on a branch edge at equal level: merge into
            // a fragment one level up, identified by the edge's weight.
            let fragment = self.table.weight(from).context(LookupSnafu)?;
            self.send(
                from,
                Message::Initiate {
                    level: self.level + 1,
                    fragment,
                    search: SearchState::Find,
                },
            )
            .await?;
            Ok(Disposition::Handled)
        }
    }

    /// `Initiate(L, F, S)`: adopt the fragment identity, relay along the
    /// fragment's other branch edges, and start finding if asked.
    async fn on_initiate(
        &mut self,
        from: VertexId,
        level: u64,
        fragment: Weight,
        search: SearchState,
    ) -> Result<(), EngineError> {
        debug!(vertex = self.id, from, level, fragment, search = %search, "initiate");
        self.level = level;
        self.fragment = Some(fragment);
        self.status = match search {
            SearchState::Find => EngineStatus::Find,
            SearchState::Found => EngineStatus::Found,
        };
        self.parent = Some(from);
        self.best_edge = None;
        self.best_weight = INFINITE_WEIGHT;

        let relays: Vec<VertexId> = self
            .edges
            .edges_in(EdgeState::Branch)
            .into_iter()
            .filter(|&peer| peer != from)
            .collect();
        for peer in relays {
            self.send(
                peer,
                Message::Initiate {
                    level,
                    fragment,
                    search,
                },
            )
            .await?;
            if search == SearchState::Find {
                self.find_count += 1;
            }
        }

        if search == SearchState::Find {
            self.run_test().await?;
        }
        Ok(())
    }

    /// Probe the cheapest unclassified edge, or report when none is left.
    async fn run_test(&mut self) -> Result<(), EngineError> {
        match self.edges.min_basic_edge(&self.table) {
            Some((peer, _)) => {
                self.test_edge = Some(peer);
                let fragment = self.fragment.context(NoFragmentSnafu)?;
                self.send(
                    peer,
                    Message::Test {
                        level: self.level,
                        fragment,
                    },
                )
                .await
            }
            None => {
                self.test_edge = None;
                self.run_report().await
            }
        }
    }

    /// `Test(L, F)`: answer whether the asking vertex is in another
    /// fragment, deferring when our level may still catch up.
    async fn on_test(
        &mut self,
        from: VertexId,
        level: u64,
        fragment: Weight,
    ) -> Result<Disposition, EngineError> {
        if level > self.level {
            return Ok(Disposition::Deferred);
        }
        if Some(fragment) != self.fragment {
            self.send(from, Message::Accept).await?;
            return Ok(Disposition::Handled);
        }

        // Same fragment: the edge is internal.
        if self.edges.state(from).context(EdgeSnafu)? == EdgeState::Basic {
            self.edges.mark_rejected(from).context(EdgeSnafu)?;
        }
        if self.test_edge != Some(from) {
            self.send(from, Message::Reject).await?;
        } else {
            // Both endpoints probed the same edge simultaneously; no
            // reply is coming, so pick the next candidate ourselves.
            self.run_test().await?;
        }
        Ok(Disposition::Handled)
    }

    /// `Accept`: the tested edge leads out of the fragment.
    async fn on_accept(&mut self, from: VertexId) -> Result<(), EngineError> {
        self.test_edge = None;
        let weight = self.table.weight(from).context(LookupSnafu)?;
        if weight < self.best_weight {
            self.best_edge = Some(from);
            self.best_weight = weight;
        }
        self.run_report().await
    }

    /// `Reject`: the tested edge is internal; try the next candidate.
    async fn on_reject(&mut self, from: VertexId) -> Result<(), EngineError> {
        if self.edges.state(from).context(EdgeSnafu)? == EdgeState::Basic {
            self.edges.mark_rejected(from).context(EdgeSnafu)?;
        }
        self.run_test().await
    }

    /// Report the round's minimum outgoing weight to the parent once
    /// every subordinate branch has reported and our own probe is done.
    async fn run_report(&mut self) -> Result<(), EngineError> {
        if self.find_count == 0 && self.test_edge.is_none() {
            self.status = EngineStatus::Found;
            let parent = self.parent.context(NoParentSnafu)?;
            self.send(
                parent,
                Message::Report {
                    weight: self.best_weight,
                },
            )
            .await?;
        }
        Ok(())
    }

    /// `Report(w)`: fold a subordinate's answer in, or, at the core,
    /// decide between growing over the best edge and terminating.
    async fn on_report(&mut self, from: VertexId, weight: Weight) -> Result<Disposition, EngineError> {
        if Some(from) != self.parent {
            // A subordinate branch reporting upward.
            self.find_count = self
                .find_count
                .checked_sub(1)
                .context(UnexpectedReportSnafu { from })?;
            if weight < self.best_weight {
                self.best_weight = weight;
                self.best_edge = Some(from);
            }
            self.run_report().await?;
            Ok(Disposition::Handled)
        } else if self.status == EngineStatus::Find {
            // Our own round is still running; answer the core peer later.
            Ok(Disposition::Deferred)
        } else if weight > self.best_weight {
            // Our side of the core holds the better outgoing edge.
            self.run_change_root().await?;
            Ok(Disposition::Handled)
        } else if weight == self.best_weight && weight == INFINITE_WEIGHT {
            // No outgoing edge anywhere: the fragment spans the graph.
            debug!(vertex = self.id, "core detected completion; terminating");
            self.terminated = true;
            Ok(Disposition::Handled)
        } else {
            Ok(Disposition::Handled)
        }
    }

    /// Walk responsibility for the join toward the best outgoing edge,
    /// and connect over it on arrival.
    async fn run_change_root(&mut self) -> Result<(), EngineError> {
        let best = self.best_edge.context(NoBestEdgeSnafu)?;
        if self.edges.state(best).context(EdgeSnafu)? == EdgeState::Branch {
            self.send(best, Message::ChangeRoot).await
        } else {
            self.edges.mark_branch(best).context(EdgeSnafu)?;
            self.send(best, Message::Connect { level: self.level }).await
        }
    }

    /// Forward `Stop` along every branch edge except the parent's.
    async fn stop_sweep(&mut self) -> Result<(), EngineError> {
        let peers: Vec<VertexId> = self
            .edges
            .edges_in(EdgeState::Branch)
            .into_iter()
            .filter(|&peer| Some(peer) != self.parent)
            .collect();
        for peer in peers {
            self.send(peer, Message::Stop).await?;
        }
        Ok(())
    }

    fn search_state(&self) -> SearchState {
        match self.status {
            EngineStatus::Find => SearchState::Find,
            _ => SearchState::Found,
        }
    }

    async fn send(&self, to: VertexId, message: Message) -> Result<(), EngineError> {
        trace!(vertex = self.id, to, kind = message.kind(), "send");
        self.substrate.send(to, message).await.context(TransportSnafu)
    }
}

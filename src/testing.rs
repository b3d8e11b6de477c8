//! In-process substrate for deterministic multi-engine testing.
//!
//! `LoopbackRouter` wires engines together through per-vertex in-memory
//! queues, enabling fast deterministic tests without real network I/O.
//! Each attached substrate observes the same guarantees the engine
//! requires from TCP: per-sender FIFO delivery, no loss, no duplication.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::transport::Envelope;
use crate::transport::Substrate;
use crate::transport::TransportError;
use crate::types::VertexId;
use crate::wire::Message;

/// Directory of in-process message queues, one per attached vertex.
#[derive(Default, Clone)]
pub struct LoopbackRouter {
    directory: Arc<Mutex<HashMap<VertexId, mpsc::UnboundedSender<Envelope>>>>,
}

impl LoopbackRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a vertex and return its substrate handle. Attach every
    /// vertex before starting any engine so no send can miss its peer.
    pub fn attach(&self, id: VertexId) -> LoopbackSubstrate {
        let (tx, inbound) = mpsc::unbounded_channel();
        self.directory
            .lock()
            .expect("router directory poisoned")
            .insert(id, tx);
        LoopbackSubstrate {
            id,
            directory: Arc::clone(&self.directory),
            inbound,
        }
    }
}

/// One vertex's handle onto the in-process router.
pub struct LoopbackSubstrate {
    id: VertexId,
    directory: Arc<Mutex<HashMap<VertexId, mpsc::UnboundedSender<Envelope>>>>,
    inbound: mpsc::UnboundedReceiver<Envelope>,
}

#[async_trait]
impl Substrate for LoopbackSubstrate {
    async fn send(&self, to: VertexId, message: Message) -> Result<(), TransportError> {
        let tx = {
            let directory = self.directory.lock().expect("router directory poisoned");
            directory
                .get(&to)
                .cloned()
                .ok_or(TransportError::UnknownPeer { to })?
        };
        tx.send(Envelope {
            from: self.id,
            message,
        })
        .map_err(|_| TransportError::ChannelClosed)
    }

    async fn recv(&mut self) -> Result<Envelope, TransportError> {
        self.inbound
            .recv()
            .await
            .ok_or(TransportError::ChannelClosed)
    }
}

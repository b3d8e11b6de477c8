//! Messaging substrate.
//!
//! The engine needs two operations from its transport: a fire-and-forget
//! `send` to a named neighbour and a blocking `recv` of the next message
//! from any incident channel. Delivery must be reliable and FIFO per
//! sender; no ordering is assumed between different senders.
//!
//! `TcpSubstrate` is the production implementation: one listener per
//! vertex on a single well-known port, one short-lived connection per
//! logical message, and the dialer binds its local address to its own
//! vertex address so the receiver derives the sender from the remote
//! endpoint. An accept loop drains connections into an in-process queue
//! in arrival order; `recv` pops from that queue.
//!
//! Tests use the deterministic in-process substrate in [`crate::testing`].

use std::collections::HashMap;
use std::net::IpAddr;
use std::net::SocketAddr;

use async_trait::async_trait;
use snafu::ResultExt;
use snafu::Snafu;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::net::TcpSocket;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;

use crate::config::NeighbourTable;
use crate::types::VertexId;
use crate::wire::Message;
use crate::wire::WireError;

/// Well-known TCP port shared by every vertex; the `(address, port)`
/// pair is unique per vertex.
pub const DEFAULT_PORT: u16 = 30000;

/// Errors from the messaging substrate.
#[derive(Debug, Snafu)]
pub enum TransportError {
    /// A configured address did not parse as an IP address.
    #[snafu(display("invalid vertex address {address:?}: {source}"))]
    BadAddress {
        /// The unparseable address.
        address: String,
        /// Underlying parse error.
        source: std::net::AddrParseError,
    },

    /// Binding the vertex listener failed.
    #[snafu(display("failed to bind listener on {address}: {source}"))]
    Bind {
        /// The local socket address.
        address: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Accepting an inbound connection failed.
    #[snafu(display("accept failed: {source}"))]
    Accept {
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Dialing a neighbour failed.
    #[snafu(display("failed to dial vertex {to} at {address}: {source}"))]
    Dial {
        /// The unreachable neighbour.
        to: VertexId,
        /// The neighbour's socket address.
        address: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Writing a record to a neighbour failed.
    #[snafu(display("failed to send to vertex {to}: {source}"))]
    Write {
        /// The intended recipient.
        to: VertexId,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Reading an inbound record failed.
    #[snafu(display("failed to read inbound record: {source}"))]
    Read {
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An inbound record failed to decode.
    #[snafu(display("inbound record did not decode: {source}"))]
    Decode {
        /// Underlying codec error.
        source: WireError,
    },

    /// An inbound connection came from an address that is not a
    /// configured neighbour.
    #[snafu(display("inbound connection from unknown address {address}"))]
    UnknownSource {
        /// The unrecognized remote address.
        address: IpAddr,
    },

    /// A send named a vertex this substrate has no channel to.
    #[snafu(display("no channel to vertex {to}"))]
    UnknownPeer {
        /// The unknown recipient.
        to: VertexId,
    },

    /// The receiving side of the substrate has been torn down.
    #[snafu(display("substrate channel closed"))]
    ChannelClosed,
}

/// An inbound message paired with the neighbour that sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// The sending neighbour.
    pub from: VertexId,
    /// The message.
    pub message: Message,
}

/// Point-to-point messaging between adjacent engines.
///
/// Implementations must deliver each sender's messages in send order,
/// without loss or duplication. `send` is fire-and-forget from the
/// engine's perspective; `recv` blocks until the next message arrives
/// on any incident channel.
#[async_trait]
pub trait Substrate: Send {
    /// Send `message` to the adjacent vertex `to`.
    async fn send(&self, to: VertexId, message: Message) -> Result<(), TransportError>;

    /// Receive the next inbound message from any neighbour.
    async fn recv(&mut self) -> Result<Envelope, TransportError>;
}

/// TCP substrate: connection-per-message over a shared well-known port.
pub struct TcpSubstrate {
    id: VertexId,
    local_ip: IpAddr,
    port: u16,
    peers: HashMap<VertexId, IpAddr>,
    inbound: mpsc::UnboundedReceiver<Result<Envelope, TransportError>>,
    accept_task: JoinHandle<()>,
}

impl TcpSubstrate {
    /// Bind this vertex's listener and start draining inbound
    /// connections. The listener is live from this point on, so a
    /// cluster can bind every vertex before any engine starts.
    pub async fn bind(table: &NeighbourTable, port: u16) -> Result<Self, TransportError> {
        let local_ip: IpAddr = table.address().parse().context(BadAddressSnafu {
            address: table.address(),
        })?;

        let mut peers = HashMap::new();
        let mut sources = HashMap::new();
        for (peer, address) in table.addresses() {
            let ip: IpAddr = address.parse().context(BadAddressSnafu { address })?;
            peers.insert(peer, ip);
            sources.insert(ip, peer);
        }

        let listen_addr = SocketAddr::new(local_ip, port);
        let listener = TcpListener::bind(listen_addr)
            .await
            .context(BindSnafu {
                address: listen_addr,
            })?;
        debug!(vertex = table.id(), address = %listen_addr, "substrate listening");

        let (tx, inbound) = mpsc::unbounded_channel();
        let accept_task = tokio::spawn(accept_loop(listener, sources, tx));

        Ok(Self {
            id: table.id(),
            local_ip,
            port,
            peers,
            inbound,
            accept_task,
        })
    }
}

/// Drain inbound connections into the substrate queue in arrival order.
///
/// Connections are read to completion one at a time so the queue order
/// matches the accept order. A fatal error is forwarded to the engine
/// and the loop exits.
async fn accept_loop(
    listener: TcpListener,
    sources: HashMap<IpAddr, VertexId>,
    tx: mpsc::UnboundedSender<Result<Envelope, TransportError>>,
) {
    loop {
        let accepted = listener.accept().await;
        let (stream, remote) = match accepted {
            Ok(pair) => pair,
            Err(source) => {
                error!("accept failed: {source}");
                let _ = tx.send(Err(TransportError::Accept { source }));
                return;
            }
        };
        match read_envelope(stream, remote, &sources).await {
            Ok(envelope) => {
                if tx.send(Ok(envelope)).is_err() {
                    // Engine exited; nothing left to deliver to.
                    return;
                }
            }
            Err(error) => {
                error!(%remote, "inbound connection rejected: {error}");
                let _ = tx.send(Err(error));
                return;
            }
        }
    }
}

async fn read_envelope(
    stream: TcpStream,
    remote: SocketAddr,
    sources: &HashMap<IpAddr, VertexId>,
) -> Result<Envelope, TransportError> {
    let from = *sources
        .get(&remote.ip())
        .ok_or(TransportError::UnknownSource {
            address: remote.ip(),
        })?;

    let mut record = String::new();
    let mut reader = BufReader::new(stream);
    reader.read_line(&mut record).await.context(ReadSnafu)?;
    let message = Message::decode(&record).context(DecodeSnafu)?;
    Ok(Envelope { from, message })
}

#[async_trait]
impl Substrate for TcpSubstrate {
    async fn send(&self, to: VertexId, message: Message) -> Result<(), TransportError> {
        let peer_ip = *self
            .peers
            .get(&to)
            .ok_or(TransportError::UnknownPeer { to })?;
        let peer_addr = SocketAddr::new(peer_ip, self.port);

        // Bind the dialing socket to our own vertex address so the
        // receiver can identify the sender from the remote endpoint.
        let socket = match self.local_ip {
            IpAddr::V4(_) => TcpSocket::new_v4(),
            IpAddr::V6(_) => TcpSocket::new_v6(),
        }
        .context(WriteSnafu { to })?;
        socket
            .bind(SocketAddr::new(self.local_ip, 0))
            .context(WriteSnafu { to })?;

        let mut stream = socket.connect(peer_addr).await.context(DialSnafu {
            to,
            address: peer_addr,
        })?;
        stream
            .write_all(message.encode().as_bytes())
            .await
            .context(WriteSnafu { to })?;
        stream.shutdown().await.context(WriteSnafu { to })?;

        debug!(vertex = self.id, to, kind = message.kind(), "sent");
        Ok(())
    }

    async fn recv(&mut self) -> Result<Envelope, TransportError> {
        self.inbound
            .recv()
            .await
            .ok_or(TransportError::ChannelClosed)?
    }
}

impl Drop for TcpSubstrate {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, warn};

use crate::protocol::error::{MajordomoError, Result};
use crate::protocol::Frames;
use crate::transport::endpoint::Endpoint;
use crate::transport::wire;

/// Inbound messages buffered across all connections
const INBOUND_CAPACITY: usize = 4096;

/// How long [`RouterSocket::close`] waits for queued messages to be written
const CLOSE_LINGER: Duration = Duration::from_secs(1);

type PeerMap = Arc<RwLock<HashMap<Bytes, mpsc::UnboundedSender<Frames>>>>;

/// Listening side of the request/reply channel (broker).
///
/// Every accepted connection gets a 5-byte routing identity (`0x00`
/// followed by a big-endian counter). Inbound messages are delivered with
/// that identity prepended as frame 0; outbound messages are routed by
/// their frame 0, which is stripped before writing. Messages for an
/// identity that is no longer connected are dropped.
pub struct RouterSocket {
    local_addr: SocketAddr,
    inbound: mpsc::Receiver<Frames>,
    peers: PeerMap,
    acceptor: JoinHandle<()>,
    closing: Option<oneshot::Sender<()>>,
}

impl RouterSocket {
    /// Binds to a `tcp://host:port` endpoint.
    pub async fn bind(endpoint: &str) -> Result<Self> {
        let endpoint: Endpoint = endpoint.parse()?;
        let listener = TcpListener::bind(endpoint.bind_addr())
            .await
            .map_err(|e| MajordomoError::Connection(format!("Failed to bind to {}: {}", endpoint, e)))?;
        let local_addr = listener.local_addr()?;

        let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let peers: PeerMap = Arc::new(RwLock::new(HashMap::new()));
        let (closing, closed) = oneshot::channel();
        let acceptor = tokio::spawn(accept_loop(listener, tx, peers.clone(), closed));

        Ok(Self {
            local_addr,
            inbound,
            peers,
            acceptor,
            closing: Some(closing),
        })
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receives the next message, identity frame first. Cancel-safe.
    pub async fn recv(&mut self) -> Result<Frames> {
        self.inbound
            .recv()
            .await
            .ok_or_else(|| MajordomoError::Transport("router acceptor stopped".to_string()))
    }

    /// Routes a message by its first frame.
    pub async fn send(&self, mut frames: Frames) -> Result<()> {
        if frames.len() < 2 {
            return Err(MajordomoError::Transport(format!(
                "routed message needs an identity and a body, got {} frames",
                frames.len()
            )));
        }
        let identity = frames.remove(0);

        let peer = self.peers.read().await.get(&identity).cloned();
        match peer {
            Some(peer) => {
                if peer.send(frames).is_err() {
                    debug!("Peer {:?} disconnected, dropping message", identity);
                }
            }
            None => debug!("Unknown identity {:?}, dropping message", identity),
        }
        Ok(())
    }

    /// Number of currently connected peers.
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Stops accepting, writes out messages already queued for each peer
    /// (waiting at most one second) and closes every connection.
    ///
    /// Dropping the socket instead discards queued messages.
    pub async fn close(mut self) {
        if let Some(closing) = self.closing.take() {
            let _ = closing.send(());
        }
        let _ = (&mut self.acceptor).await;
    }
}

impl Drop for RouterSocket {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    inbound: mpsc::Sender<Frames>,
    peers: PeerMap,
    mut closed: oneshot::Receiver<()>,
) {
    let mut next_identity: u32 = 0;
    // Dropping the sets (when this task ends or is aborted) aborts every
    // connection.
    let mut readers = JoinSet::new();
    let mut writers = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let mut identity = [0u8; 5];
                    identity[1..].copy_from_slice(&next_identity.to_be_bytes());
                    next_identity = next_identity.wrapping_add(1);
                    let identity = Bytes::copy_from_slice(&identity);
                    debug!("Connection established from {} as {:?}", peer_addr, identity);

                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
                    }
                    spawn_connection(
                        &mut readers,
                        &mut writers,
                        stream,
                        identity,
                        inbound.clone(),
                        peers.clone(),
                    )
                    .await;
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            },
            Some(_) = readers.join_next(), if !readers.is_empty() => {}
            Some(_) = writers.join_next(), if !writers.is_empty() => {}
            _ = &mut closed => break,
        }
    }

    // Dropping the senders lets each writer finish its queue and exit.
    peers.write().await.clear();
    let drained = timeout(CLOSE_LINGER, async {
        while writers.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Closing router with unsent messages");
    }
}

async fn spawn_connection(
    readers: &mut JoinSet<()>,
    writers: &mut JoinSet<()>,
    stream: TcpStream,
    identity: Bytes,
    inbound: mpsc::Sender<Frames>,
    peers: PeerMap,
) {
    let (read_half, mut write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frames>();
    peers.write().await.insert(identity.clone(), out_tx);

    writers.spawn(async move {
        while let Some(frames) = out_rx.recv().await {
            if let Err(e) = wire::write_message(&mut write_half, &frames).await {
                debug!("Write failed: {}", e);
                break;
            }
        }
    });

    readers.spawn(async move {
        let mut read_half = BufReader::new(read_half);
        loop {
            match wire::read_message(&mut read_half).await {
                Ok(Some(mut frames)) => {
                    frames.insert(0, identity.clone());
                    if inbound.send(frames).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Peer {:?} closed the connection", identity);
                    break;
                }
                Err(e) => {
                    warn!("Dropping connection {:?}: {}", identity, e);
                    break;
                }
            }
        }
        // Removing the sender ends the writer task.
        peers.write().await.remove(&identity);
    });
}

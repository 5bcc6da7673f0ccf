use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

use crate::config::DEFAULT_CONNECT_TIMEOUT;
use crate::protocol::error::{MajordomoError, Result};
use crate::protocol::Frames;
use crate::transport::endpoint::Endpoint;
use crate::transport::wire;

/// Inbound messages buffered per connection
const INBOUND_CAPACITY: usize = 1024;

/// Outbound side of a request/reply connection (client or worker).
///
/// Sends and receives multipart messages unchanged. A reader task owns the
/// read half of the stream and forwards every message through a channel,
/// so [`recv`](Self::recv) is cancel-safe and can sit in a `tokio::select!`
/// arm next to timers.
///
/// # Example
///
/// ```no_run
/// use majordomo_common::transport::DealerSocket;
/// use bytes::Bytes;
///
/// # #[tokio::main]
/// # async fn main() -> majordomo_common::Result<()> {
/// let mut socket = DealerSocket::connect("tcp://127.0.0.1:5555").await?;
/// socket.send(&[Bytes::new(), Bytes::from_static(&[0x04])]).await?;
/// let reply = socket.recv().await?;
/// # Ok(())
/// # }
/// ```
pub struct DealerSocket {
    writer: OwnedWriteHalf,
    inbound: mpsc::Receiver<Result<Frames>>,
    reader: JoinHandle<()>,
    peer: SocketAddr,
}

impl DealerSocket {
    /// Connects to a `tcp://host:port` endpoint, giving up after
    /// [`DEFAULT_CONNECT_TIMEOUT`].
    pub async fn connect(endpoint: &str) -> Result<Self> {
        Self::connect_timeout(endpoint, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connects to a remote endpoint within a time limit.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The endpoint to connect to (e.g., "tcp://127.0.0.1:5555")
    /// * `limit` - How long the TCP handshake may take
    ///
    /// # Returns
    ///
    /// A connected socket whose reader task is already running
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The endpoint cannot be parsed
    /// - The connection is refused or fails
    /// - The handshake does not complete within `limit`
    pub async fn connect_timeout(endpoint: &str, limit: Duration) -> Result<Self> {
        let endpoint: Endpoint = endpoint.parse()?;
        let addr = endpoint.connect_addr();
        let stream = match timeout(limit, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(MajordomoError::Connection(format!(
                    "Failed to connect to {}: {}",
                    endpoint, e
                )))
            }
            Err(_) => {
                return Err(MajordomoError::Connection(format!(
                    "Connecting to {} timed out after {}ms",
                    endpoint,
                    limit.as_millis()
                )))
            }
        };
        Self::from_stream(stream)
    }

    /// Wraps an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (read_half, writer) = stream.into_split();
        let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);

        let reader = tokio::spawn(async move {
            let mut read_half = BufReader::new(read_half);
            loop {
                match wire::read_message(&mut read_half).await {
                    Ok(Some(frames)) => {
                        if tx.send(Ok(frames)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("Connection to {} closed by peer", peer);
                        break;
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        Ok(Self {
            writer,
            inbound,
            reader,
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send(&mut self, frames: &[Bytes]) -> Result<()> {
        wire::write_message(&mut self.writer, frames).await
    }

    /// Receives the next message.
    ///
    /// Fails with a connection error once the peer has closed the stream;
    /// the socket must then be dropped and reconnected.
    pub async fn recv(&mut self) -> Result<Frames> {
        match self.inbound.recv().await {
            Some(result) => result,
            None => Err(MajordomoError::Connection(format!(
                "connection to {} closed",
                self.peer
            ))),
        }
    }
}

impl Drop for DealerSocket {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

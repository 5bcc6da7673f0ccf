//! One-way fan-out channel
//!
//! The publisher binds; subscribers connect and declare topic prefixes with
//! `[0x01, prefix]` (subscribe) or `[0x00, prefix]` (unsubscribe) messages.
//! Each published `[topic, payload]` message goes to every subscriber with
//! a matching prefix. Publishing never waits on a slow subscriber: when its
//! queue is full the message is dropped for that subscriber only.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, warn};

use crate::protocol::error::{MajordomoError, Result};
use crate::protocol::Frames;
use crate::transport::dealer::DealerSocket;
use crate::transport::endpoint::Endpoint;
use crate::transport::wire;

const SUBSCRIBE: u8 = 0x01;
const UNSUBSCRIBE: u8 = 0x00;

/// Messages queued per subscriber before publishing starts dropping
const SUBSCRIBER_QUEUE: usize = 1024;

struct SubscriberEntry {
    prefixes: Vec<Bytes>,
    queue: mpsc::Sender<Frames>,
}

impl SubscriberEntry {
    fn matches(&self, topic: &[u8]) -> bool {
        self.prefixes.iter().any(|p| topic.starts_with(p))
    }
}

type SubscriberMap = Arc<RwLock<HashMap<u64, SubscriberEntry>>>;

/// Publishing side of the fan-out channel.
pub struct PublisherSocket {
    local_addr: SocketAddr,
    subscribers: SubscriberMap,
    acceptor: JoinHandle<()>,
}

impl PublisherSocket {
    pub async fn bind(endpoint: &str) -> Result<Self> {
        let endpoint: Endpoint = endpoint.parse()?;
        let listener = TcpListener::bind(endpoint.bind_addr())
            .await
            .map_err(|e| MajordomoError::Connection(format!("Failed to bind to {}: {}", endpoint, e)))?;
        let local_addr = listener.local_addr()?;

        let subscribers: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));
        let acceptor = tokio::spawn(accept_loop(listener, subscribers.clone()));

        Ok(Self {
            local_addr,
            subscribers,
            acceptor,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sends `[topic, payload]` to every matching subscriber and returns how
    /// many received it.
    pub async fn publish(&self, topic: &str, payload: Bytes) -> usize {
        let frames = vec![Bytes::copy_from_slice(topic.as_bytes()), payload];
        let subscribers = self.subscribers.read().await;

        let mut delivered = 0;
        for (id, subscriber) in subscribers.iter() {
            if !subscriber.matches(topic.as_bytes()) {
                continue;
            }
            match subscriber.queue.try_send(frames.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Subscriber {} is not keeping up, dropping '{}' message", id, topic)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

impl Drop for PublisherSocket {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn accept_loop(listener: TcpListener, subscribers: SubscriberMap) {
    let mut next_id: u64 = 0;
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    debug!("Subscriber {} connected from {}", next_id, peer_addr);
                    spawn_subscriber(&mut connections, stream, next_id, subscribers.clone()).await;
                    next_id += 1;
                }
                Err(e) => error!("Failed to accept subscriber: {}", e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn spawn_subscriber(
    connections: &mut JoinSet<()>,
    stream: TcpStream,
    id: u64,
    subscribers: SubscriberMap,
) {
    let (read_half, mut write_half) = stream.into_split();
    let (queue, mut rx) = mpsc::channel::<Frames>(SUBSCRIBER_QUEUE);
    subscribers.write().await.insert(
        id,
        SubscriberEntry {
            prefixes: Vec::new(),
            queue,
        },
    );

    connections.spawn(async move {
        while let Some(frames) = rx.recv().await {
            if let Err(e) = wire::write_message(&mut write_half, &frames).await {
                debug!("Subscriber {} write failed: {}", id, e);
                break;
            }
        }
    });

    connections.spawn(async move {
        let mut read_half = BufReader::new(read_half);
        loop {
            match wire::read_message(&mut read_half).await {
                Ok(Some(frames)) => apply_subscription(&subscribers, id, &frames).await,
                Ok(None) => break,
                Err(e) => {
                    debug!("Subscriber {} dropped: {}", id, e);
                    break;
                }
            }
        }
        subscribers.write().await.remove(&id);
    });
}

async fn apply_subscription(subscribers: &SubscriberMap, id: u64, frames: &[Bytes]) {
    let (action, prefix) = match frames {
        [action, prefix] if action.len() == 1 => (action[0], prefix.clone()),
        _ => {
            warn!("Subscriber {} sent malformed subscription ({} frames)", id, frames.len());
            return;
        }
    };

    let mut subscribers = subscribers.write().await;
    let Some(entry) = subscribers.get_mut(&id) else {
        return;
    };
    match action {
        SUBSCRIBE => {
            if !entry.prefixes.contains(&prefix) {
                entry.prefixes.push(prefix);
            }
        }
        UNSUBSCRIBE => entry.prefixes.retain(|p| p != &prefix),
        other => warn!("Subscriber {} sent unknown subscription action {}", id, other),
    }
}

/// Receiving side of the fan-out channel.
pub struct SubscriberSocket {
    inner: DealerSocket,
}

impl SubscriberSocket {
    pub async fn connect(endpoint: &str) -> Result<Self> {
        Ok(Self {
            inner: DealerSocket::connect(endpoint).await?,
        })
    }

    /// Subscribes to every topic starting with `prefix`; `""` matches all.
    pub async fn subscribe(&mut self, prefix: &str) -> Result<()> {
        self.inner
            .send(&[
                Bytes::from_static(&[SUBSCRIBE]),
                Bytes::copy_from_slice(prefix.as_bytes()),
            ])
            .await
    }

    pub async fn unsubscribe(&mut self, prefix: &str) -> Result<()> {
        self.inner
            .send(&[
                Bytes::from_static(&[UNSUBSCRIBE]),
                Bytes::copy_from_slice(prefix.as_bytes()),
            ])
            .await
    }

    /// Receives the next `(topic, payload)` pair. Cancel-safe.
    pub async fn recv(&mut self) -> Result<(String, Bytes)> {
        loop {
            let frames = self.inner.recv().await?;
            match <[Bytes; 2]>::try_from(frames) {
                Ok([topic, payload]) => {
                    return Ok((String::from_utf8_lossy(&topic).into_owned(), payload))
                }
                Err(frames) => warn!("Dropping malformed publication ({} frames)", frames.len()),
            }
        }
    }
}

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::Bytes;
use majordomo_common::config::BrokerConfig;
use majordomo_common::liveness::HeartbeatTimer;
use majordomo_common::protocol::envelope::{self, ClientMessage, Frames, Inbound, WorkerMessage};
use majordomo_common::protocol::error::{MajordomoError, Result};
use majordomo_common::protocol::{
    is_internal_service, BrokerStats, RequestId, MMI_FOUND, MMI_NOT_FOUND, MMI_NOT_IMPLEMENTED,
    MMI_SERVICE,
};
use majordomo_common::transport::{PublisherSocket, RouterSocket};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::registry::{Dispatch, QueuedRequest, RegistryError, WorkerRegistry};
use crate::worker::display_identity;

enum BrokerCommand {
    Stats(oneshot::Sender<BrokerStats>),
    Publish {
        topic: String,
        payload: Bytes,
        delivered: oneshot::Sender<Result<usize>>,
    },
    Shutdown,
}

/// Majordomo broker
///
/// Routes client calls to pools of workers grouped by service name, and
/// fans out notifications to subscribers.
///
/// # Architecture
///
/// `bind` opens the sockets and spawns one event loop that owns the
/// [`WorkerRegistry`]. The returned `Broker` is a handle that talks to the
/// loop through a mailbox. The loop multiplexes:
///
/// - inbound envelopes from clients and workers
/// - the worker heartbeat timer
/// - the liveness sweep, which evicts silent workers
/// - the backlog sweep, which drops calls older than the backlog TTL
/// - handle commands (stats, publish, shutdown)
///
/// # Delivery
///
/// Calls are never failed by the broker. A call queued for a service that
/// gets no worker within the backlog TTL is dropped silently, and a call
/// forwarded to a worker that then disappears is not requeued; clients
/// detect both through their own timeout.
///
/// # Example
///
/// ```no_run
/// use majordomo_broker::Broker;
/// use majordomo_common::BrokerConfig;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = Broker::bind(BrokerConfig::new("tcp://*:5555")).await?;
/// println!("broker listening on {}", broker.endpoint());
///
/// tokio::signal::ctrl_c().await?;
/// broker.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Broker {
    local_addr: SocketAddr,
    publish_addr: Option<SocketAddr>,
    commands: mpsc::UnboundedSender<BrokerCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Broker {
    /// Binds the request endpoint (and the publish endpoint, if configured)
    /// and starts routing.
    ///
    /// # Arguments
    ///
    /// * `config` - Endpoints, heartbeat timing and backlog limits
    ///
    /// # Returns
    ///
    /// A handle to the running broker; port 0 binds are resolved in
    /// [`local_addr`](Self::local_addr) and [`publish_addr`](Self::publish_addr)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - An endpoint cannot be parsed
    /// - An endpoint cannot be bound (e.g. the port is in use)
    pub async fn bind(config: BrokerConfig) -> Result<Self> {
        let router = RouterSocket::bind(&config.bind).await?;
        let local_addr = router.local_addr();

        let publisher = match &config.publish_bind {
            Some(bind) => Some(PublisherSocket::bind(bind).await?),
            None => None,
        };
        let publish_addr = publisher.as_ref().map(PublisherSocket::local_addr);

        info!("Broker listening on {}", local_addr);
        if let Some(addr) = publish_addr {
            info!("Broker publishing on {}", addr);
        }

        let (commands, mailbox) = mpsc::unbounded_channel();
        let event_loop = BrokerLoop {
            config,
            router,
            publisher,
            registry: WorkerRegistry::new(),
            mailbox,
            started_at: Instant::now(),
        };
        let task = tokio::spawn(event_loop.run());

        Ok(Self {
            local_addr,
            publish_addr,
            commands,
            task: Mutex::new(Some(task)),
        })
    }

    /// Gets the actual bound address of the request endpoint.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connectable `tcp://` endpoint for clients and workers.
    pub fn endpoint(&self) -> String {
        connectable(self.local_addr)
    }

    pub fn publish_addr(&self) -> Option<SocketAddr> {
        self.publish_addr
    }

    /// Connectable `tcp://` endpoint for subscribers.
    pub fn publish_endpoint(&self) -> Option<String> {
        self.publish_addr.map(connectable)
    }

    /// Snapshot of registered workers, per-service queues and subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`MajordomoError::NotRunning`] after shutdown.
    pub async fn stats(&self) -> Result<BrokerStats> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(BrokerCommand::Stats(tx))
            .map_err(|_| MajordomoError::NotRunning)?;
        rx.await.map_err(|_| MajordomoError::NotRunning)
    }

    /// Publishes a notification to every subscriber of a matching topic
    /// prefix.
    ///
    /// # Arguments
    ///
    /// * `topic` - Topic string, matched against subscription prefixes
    /// * `payload` - Opaque notification body
    ///
    /// # Returns
    ///
    /// The number of subscribers the notification was queued for
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The broker was bound without a publish endpoint
    /// - The broker has shut down ([`MajordomoError::NotRunning`])
    pub async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize> {
        let (delivered, rx) = oneshot::channel();
        self.commands
            .send(BrokerCommand::Publish {
                topic: topic.to_string(),
                payload,
                delivered,
            })
            .map_err(|_| MajordomoError::NotRunning)?;
        rx.await.map_err(|_| MajordomoError::NotRunning)?
    }

    /// Disconnects every registered worker and stops routing.
    ///
    /// Calling it again does nothing.
    pub async fn shutdown(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        let _ = self.commands.send(BrokerCommand::Shutdown);
        if let Err(e) = task.await {
            error!("Broker event loop failed: {}", e);
        }
        info!("Broker stopped");
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Turns a bound address into an endpoint a local peer can connect to.
fn connectable(addr: SocketAddr) -> String {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    format!("tcp://{}", SocketAddr::new(ip, addr.port()))
}

struct BrokerLoop {
    config: BrokerConfig,
    router: RouterSocket,
    publisher: Option<PublisherSocket>,
    registry: WorkerRegistry,
    mailbox: mpsc::UnboundedReceiver<BrokerCommand>,
    started_at: Instant,
}

impl BrokerLoop {
    async fn run(mut self) {
        let mut heartbeat = HeartbeatTimer::new(self.config.heartbeat_interval);
        let mut liveness = HeartbeatTimer::new(self.config.liveness_sweep_interval);
        let mut backlog = HeartbeatTimer::new(self.config.backlog_sweep_interval);

        loop {
            tokio::select! {
                command = self.mailbox.recv() => match command {
                    Some(BrokerCommand::Stats(reply)) => {
                        let _ = reply.send(self.stats().await);
                    }
                    Some(BrokerCommand::Publish { topic, payload, delivered }) => {
                        let _ = delivered.send(self.publish(&topic, payload).await);
                    }
                    Some(BrokerCommand::Shutdown) | None => break,
                },
                inbound = self.router.recv() => match inbound {
                    Ok(frames) => self.handle_inbound(frames).await,
                    Err(e) => {
                        error!("Router socket failed: {}", e);
                        break;
                    }
                },
                _ = heartbeat.tick() => self.heartbeat_workers().await,
                _ = liveness.tick() => self.purge_workers(),
                _ = backlog.tick() => self.purge_backlog(),
            }
        }

        self.shutdown().await;
        self.router.close().await;
    }

    async fn handle_inbound(&mut self, frames: Frames) {
        let (sender, inbound) = match envelope::decode_routed(&frames) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping malformed envelope ({} frames): {}", frames.len(), e);
                return;
            }
        };

        match inbound {
            Inbound::Client(ClientMessage::Heartbeat) => {
                let frames = envelope::encode_client(&ClientMessage::Heartbeat);
                self.send(envelope::route(sender, frames)).await;
            }
            Inbound::Client(ClientMessage::Call {
                service,
                request_id,
                payload,
            }) => self.handle_call(sender, service, request_id, payload).await,
            Inbound::Worker(message) => self.handle_worker(sender, message).await,
        }
    }

    async fn handle_call(&mut self, client: Bytes, service: String, request_id: RequestId, payload: Bytes) {
        if is_internal_service(&service) {
            self.handle_internal(client, service, request_id, payload).await;
            return;
        }

        let request = QueuedRequest {
            client,
            request_id,
            payload,
            queued_at: Instant::now(),
        };
        let id = request.request_id.clone();
        match self.registry.submit(&service, request) {
            Some(dispatch) => self.forward(dispatch).await,
            None => debug!("No worker available for '{}', request {} queued", service, id),
        }
    }

    /// Answers `mmi.*` calls from the broker itself.
    async fn handle_internal(&mut self, client: Bytes, service: String, request_id: RequestId, payload: Bytes) {
        let status = if service == MMI_SERVICE {
            let name = String::from_utf8_lossy(&payload);
            if self.registry.has_service(&name) {
                MMI_FOUND
            } else {
                MMI_NOT_FOUND
            }
        } else {
            MMI_NOT_IMPLEMENTED
        };
        debug!("Internal service '{}' answered {}", service, status);
        self.reply_to_client(client, service, request_id, Bytes::from_static(status.as_bytes()))
            .await;
    }

    async fn handle_worker(&mut self, worker: Bytes, message: WorkerMessage) {
        let now = Instant::now();
        match message {
            WorkerMessage::Ready { service } => {
                match self.registry.register(worker.clone(), &service, now) {
                    Ok(()) => {
                        info!(
                            "Worker {} registered for service '{}'",
                            display_identity(&worker),
                            service
                        );
                        self.dispatch(&service).await;
                    }
                    Err(e) => {
                        warn!("Rejecting READY from worker {}: {}", display_identity(&worker), e);
                        if matches!(e, RegistryError::AlreadyRegistered(_)) {
                            self.registry.remove(&worker);
                        }
                        self.disconnect(worker).await;
                    }
                }
            }
            WorkerMessage::Reply {
                client,
                request_id,
                payload,
            } => {
                let Some(service) = self.registry.release(&worker, now) else {
                    warn!("REPLY from unregistered worker {}", display_identity(&worker));
                    self.disconnect(worker).await;
                    return;
                };
                self.reply_to_client(client, service.clone(), request_id, payload)
                    .await;
                self.dispatch(&service).await;
            }
            WorkerMessage::Heartbeat => {
                if !self.registry.touch(&worker, now) {
                    warn!("HEARTBEAT from unregistered worker {}", display_identity(&worker));
                    self.disconnect(worker).await;
                }
            }
            WorkerMessage::Disconnect => {
                if let Some(entry) = self.registry.remove(&worker) {
                    info!(
                        "Worker {} for service '{}' disconnected after {}s, {} replies",
                        display_identity(&worker),
                        entry.service,
                        entry.registered_at.elapsed().as_secs(),
                        entry.replies
                    );
                }
            }
            WorkerMessage::Request { .. } => {
                warn!(
                    "Dropping REQUEST sent by worker {}",
                    display_identity(&worker)
                );
            }
        }
    }

    async fn dispatch(&mut self, service: &str) {
        for dispatch in self.registry.dispatch(service) {
            self.forward(dispatch).await;
        }
    }

    async fn forward(&self, dispatch: Dispatch) {
        let Dispatch { worker, request } = dispatch;
        debug!(
            "Forwarding request {} to worker {}",
            request.request_id,
            display_identity(&worker)
        );
        let frames = envelope::encode_worker(&WorkerMessage::Request {
            client: request.client,
            request_id: request.request_id,
            payload: request.payload,
        });
        self.send(envelope::route(worker, frames)).await;
    }

    async fn reply_to_client(&self, client: Bytes, service: String, request_id: RequestId, payload: Bytes) {
        let frames = envelope::encode_client(&ClientMessage::Call {
            service,
            request_id,
            payload,
        });
        self.send(envelope::route(client, frames)).await;
    }

    async fn disconnect(&self, worker: Bytes) {
        let frames = envelope::encode_worker(&WorkerMessage::Disconnect);
        self.send(envelope::route(worker, frames)).await;
    }

    async fn heartbeat_workers(&self) {
        let frames = envelope::encode_worker(&WorkerMessage::Heartbeat);
        for worker in self.registry.worker_identities() {
            self.send(envelope::route(worker, frames.clone())).await;
        }
    }

    fn purge_workers(&mut self) {
        let timeout = self.config.liveness_timeout();
        for worker in self.registry.purge_expired(Instant::now(), timeout) {
            warn!(
                "Worker {} for service '{}' expired after {}ms of silence",
                display_identity(&worker.identity),
                worker.service,
                worker.liveness.age(Instant::now()).as_millis()
            );
        }
    }

    fn purge_backlog(&mut self) {
        let dropped = self
            .registry
            .purge_backlog(Instant::now(), self.config.backlog_ttl);
        if dropped > 0 {
            warn!(
                "Dropped {} queued requests older than {}ms",
                dropped,
                self.config.backlog_ttl.as_millis()
            );
        }
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize> {
        match &self.publisher {
            Some(publisher) => Ok(publisher.publish(topic, payload).await),
            None => Err(MajordomoError::Transport(
                "broker has no publish endpoint".to_string(),
            )),
        }
    }

    async fn stats(&self) -> BrokerStats {
        let subscribers = match &self.publisher {
            Some(publisher) => publisher.subscriber_count().await,
            None => 0,
        };
        BrokerStats {
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
            workers: self.registry.worker_count(),
            services: self.registry.snapshot(),
            subscribers,
        }
    }

    async fn send(&self, frames: Frames) {
        if let Err(e) = self.router.send(frames).await {
            error!("Failed to route message: {}", e);
        }
    }

    async fn shutdown(&mut self) {
        let workers = self.registry.worker_identities();
        for worker in &workers {
            self.disconnect(worker.clone()).await;
            self.registry.remove(worker);
        }
        info!("Broker shutting down, disconnected {} workers", workers.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectable_maps_unspecified_to_loopback() {
        let v4: SocketAddr = "0.0.0.0:5555".parse().unwrap();
        assert_eq!(connectable(v4), "tcp://127.0.0.1:5555");

        let v6: SocketAddr = "[::]:5555".parse().unwrap();
        assert_eq!(connectable(v6), "tcp://[::1]:5555");

        let bound: SocketAddr = "10.0.0.4:7000".parse().unwrap();
        assert_eq!(connectable(bound), "tcp://10.0.0.4:7000");
    }
}

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use majordomo_common::config::ClientConfig;
use majordomo_common::liveness::HeartbeatTimer;
use majordomo_common::protocol::envelope::{self, ClientMessage};
use majordomo_common::protocol::error::{MajordomoError, Result};
use majordomo_common::protocol::{
    CallPayload, Frames, Kwargs, ReplyPayload, RequestId, MMI_FOUND, MMI_SERVICE,
};
use majordomo_common::transport::DealerSocket;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{RpcError, RpcResult};
use crate::request_table::{PendingRequest, ReplyKind, RequestTable};

/// Capacity of the notification channel returned by [`RpcClient::events`]
const EVENT_CAPACITY: usize = 64;

/// Connection notifications emitted by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    /// The broker answered a heartbeat
    Heartbeat,
}

/// Monitoring snapshot of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    pub active: bool,
    pub connected: bool,
    pub pending_requests: usize,
    pub broker_url: String,
}

/// State written by the event loop and read by [`RpcClient::status`].
#[derive(Debug, Default)]
struct SharedState {
    connected: AtomicBool,
    pending: AtomicUsize,
}

enum ClientCommand {
    Call(PendingRequest),
    Stop,
}

struct Running {
    commands: mpsc::UnboundedSender<ClientCommand>,
    task: JoinHandle<()>,
}

/// Majordomo RPC client
///
/// Issues correlated calls to named services through a broker and survives
/// broker restarts and connection drops.
///
/// # Architecture
///
/// One event loop task owns the connection and the request table. Callers
/// talk to it through a mailbox and wait on a per-call oneshot, so the
/// table has a single writer. The loop multiplexes:
///
/// - caller commands (new calls, stop)
/// - inbound replies and heartbeats
/// - the heartbeat timer
/// - the earliest request deadline, plus a periodic backstop sweep
/// - the reconnect timer and the pending connect attempt while disconnected
///
/// # Delivery
///
/// After a reconnect every still-pending call is written again (at most
/// `retries` times), so a worker may execute a call more than once. The
/// caller still sees exactly one outcome.
///
/// # Example
///
/// ```no_run
/// use majordomo_client::RpcClient;
/// use majordomo_common::ClientConfig;
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RpcClient::new(ClientConfig::new("tcp://127.0.0.1:5555"));
/// client.start().await?;
///
/// let balance = client
///     .call("account", "get_balance", vec![json!("acc-1")], Default::default())
///     .await?;
/// println!("{}", balance);
///
/// client.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct RpcClient {
    config: ClientConfig,
    running: Mutex<Option<Running>>,
    shared: Arc<SharedState>,
    events: broadcast::Sender<ClientEvent>,
}

impl RpcClient {
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            running: Mutex::new(None),
            shared: Arc::new(SharedState::default()),
            events,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Starts the event loop, which connects to the broker in the background.
    ///
    /// A broker that cannot be reached yet is not an error: the client
    /// retries every `reconnect_interval` and sends queued calls once
    /// connected. Calls may be issued as soon as this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The client is already active ([`MajordomoError::AlreadyStarted`])
    /// - `broker_url` is not a valid `tcp://host:port` endpoint
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(MajordomoError::AlreadyStarted);
        }
        // Reject malformed endpoints up front rather than retrying forever.
        self.config
            .broker_url
            .parse::<majordomo_common::transport::Endpoint>()?;

        let (commands, mailbox) = mpsc::unbounded_channel();
        let mut event_loop = EventLoop {
            config: self.config.clone(),
            socket: None,
            table: RequestTable::new(),
            mailbox,
            shared: self.shared.clone(),
            events: self.events.clone(),
            reconnect_at: None,
            connecting: None,
            ever_attempted: false,
        };
        event_loop.begin_connect();

        let task = tokio::spawn(event_loop.run());
        *running = Some(Running { commands, task });
        info!("RPC client started for {}", self.config.broker_url);
        Ok(())
    }

    /// Stops the client.
    ///
    /// Every outstanding call fails with [`RpcError::ShuttingDown`], then the
    /// connection is closed. Stopping an inactive client does nothing.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        let _ = running.commands.send(ClientCommand::Stop);
        if let Err(e) = running.task.await {
            error!("Client event loop failed: {}", e);
        }
        info!("RPC client stopped");
    }

    /// Calls `method` on `service` and waits for the reply.
    ///
    /// The call is queued while the broker is unreachable and resent after
    /// a reconnect, but resolves exactly once.
    ///
    /// # Arguments
    ///
    /// * `service` - Name the target workers registered under
    /// * `method` - Handler to invoke on the worker
    /// * `args` - Positional arguments
    /// * `kwargs` - Keyword arguments
    ///
    /// # Returns
    ///
    /// The value returned by the remote handler
    ///
    /// # Errors
    ///
    /// - [`RpcError::NotActive`] if the client was not started
    /// - [`RpcError::Timeout`] if no reply arrives within `timeout`
    /// - [`RpcError::Protocol`] if the handler failed or the reply cannot be decoded
    /// - [`RpcError::ShuttingDown`] if the client is stopped first
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> RpcResult<Value> {
        let id = RequestId::new();
        let commands = self.commands(&id).await?;

        let payload = self
            .config
            .codec
            .encode(&CallPayload::new(method, args.clone(), kwargs.clone()))
            .map_err(|e| RpcError::Protocol {
                id: id.clone(),
                message: format!("failed to encode call: {}", e),
            })?;

        let (request, reply) =
            PendingRequest::new(id.clone(), service, method, args, kwargs, ReplyKind::Call, payload);
        Self::submit(commands, request, reply).await
    }

    /// Asks the broker whether any worker is registered for `service`.
    ///
    /// # Returns
    ///
    /// `true` if at least one worker currently serves `service`
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call).
    pub async fn service_available(&self, service: &str) -> RpcResult<bool> {
        let id = RequestId::new();
        let commands = self.commands(&id).await?;

        let payload = Bytes::copy_from_slice(service.as_bytes());
        let (request, reply) = PendingRequest::new(
            id,
            MMI_SERVICE,
            service,
            Vec::new(),
            Kwargs::new(),
            ReplyKind::Raw,
            payload,
        );
        let status = Self::submit(commands, request, reply).await?;
        Ok(status.as_str() == Some(MMI_FOUND))
    }

    /// Subscribes to connection notifications.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> ClientStatus {
        ClientStatus {
            active: self.is_active().await,
            connected: self.shared.connected.load(Ordering::Relaxed),
            pending_requests: self.shared.pending.load(Ordering::Relaxed),
            broker_url: self.config.broker_url.clone(),
        }
    }

    pub async fn is_active(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    async fn commands(&self, id: &RequestId) -> RpcResult<mpsc::UnboundedSender<ClientCommand>> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| r.commands.clone())
            .ok_or_else(|| RpcError::NotActive { id: id.clone() })
    }

    async fn submit(
        commands: mpsc::UnboundedSender<ClientCommand>,
        request: PendingRequest,
        reply: tokio::sync::oneshot::Receiver<RpcResult<Value>>,
    ) -> RpcResult<Value> {
        let id = request.id.clone();
        if commands.send(ClientCommand::Call(request)).is_err() {
            return Err(RpcError::NotActive { id });
        }
        // A dropped slot means the loop went away with the request in it.
        reply.await.unwrap_or(Err(RpcError::ShuttingDown { id }))
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.task.abort();
        }
    }
}

struct EventLoop {
    config: ClientConfig,
    socket: Option<DealerSocket>,
    table: RequestTable,
    mailbox: mpsc::UnboundedReceiver<ClientCommand>,
    shared: Arc<SharedState>,
    events: broadcast::Sender<ClientEvent>,
    reconnect_at: Option<Instant>,
    connecting: Option<BoxFuture<'static, Result<DealerSocket>>>,
    ever_attempted: bool,
}

impl EventLoop {
    async fn run(mut self) {
        let mut heartbeat = HeartbeatTimer::new(self.config.heartbeat_interval);
        let mut sweep = HeartbeatTimer::new(self.config.sweep_interval);

        loop {
            let deadline = self.table.next_deadline(self.config.timeout);

            tokio::select! {
                command = self.mailbox.recv() => match command {
                    Some(ClientCommand::Call(request)) => self.submit(request).await,
                    Some(ClientCommand::Stop) | None => break,
                },
                inbound = recv_from(&mut self.socket) => match inbound {
                    Ok(frames) => self.handle_inbound(frames),
                    Err(e) => self.connection_lost(e),
                },
                _ = heartbeat.tick() => self.send_heartbeat().await,
                _ = sweep.tick() => self.expire(),
                _ = sleep_until_some(deadline) => self.expire(),
                _ = sleep_until_some(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.begin_connect();
                }
                result = connect_from(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connected(result).await;
                }
            }

            self.shared.pending.store(self.table.len(), Ordering::Relaxed);
        }

        self.shutdown();
    }

    /// Starts a connect attempt; the loop keeps serving while it is pending.
    fn begin_connect(&mut self) {
        if self.socket.is_some() || self.connecting.is_some() {
            return;
        }
        let url = self.config.broker_url.clone();
        let limit = self.config.connect_timeout;
        self.connecting = Some(async move { DealerSocket::connect_timeout(&url, limit).await }.boxed());
    }

    /// Installs a new connection and writes every call waiting for it.
    async fn on_connected(&mut self, result: Result<DealerSocket>) {
        let first_attempt = !self.ever_attempted;
        self.ever_attempted = true;
        match result {
            Ok(socket) => {
                info!("Connected to broker at {}", self.config.broker_url);
                self.socket = Some(socket);
                self.shared.connected.store(true, Ordering::Relaxed);
                let _ = self.events.send(ClientEvent::Connected);
                self.flush_pending().await;
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", self.config.broker_url, e);
                if first_attempt {
                    let _ = self.events.send(ClientEvent::Disconnected);
                }
                self.schedule_reconnect();
            }
        }
    }

    async fn flush_pending(&mut self) {
        for (service, id, payload) in self.table.sendable(self.config.retries) {
            debug!("Sending request {} to {}", id, service);
            if let Err(e) = self.write_call(service, id.clone(), payload).await {
                self.connection_lost(e);
                return;
            }
            self.table.mark_sent(&id);
        }
    }

    async fn submit(&mut self, mut request: PendingRequest) {
        // The timeout runs from here, independent of later resends.
        request.created_at = Instant::now();
        let id = request.id.clone();
        let service = request.service.clone();
        let payload = request.payload.clone();
        request.sent = false;
        self.table.insert(request);

        if self.socket.is_none() {
            debug!("Request {} queued until the broker is reachable", id);
            return;
        }
        debug!("Sending request {} to {}", id, service);
        match self.write_call(service, id.clone(), payload).await {
            Ok(()) => {
                self.table.mark_sent(&id);
            }
            Err(e) => self.connection_lost(e),
        }
    }

    async fn write_call(&mut self, service: String, request_id: RequestId, payload: Bytes) -> Result<()> {
        let frames = envelope::encode_client(&ClientMessage::Call {
            service,
            request_id,
            payload,
        });
        match self.socket.as_mut() {
            Some(socket) => socket.send(&frames).await,
            None => Err(MajordomoError::Connection("not connected".to_string())),
        }
    }

    async fn send_heartbeat(&mut self) {
        let Some(socket) = self.socket.as_mut() else {
            return;
        };
        let frames = envelope::encode_client(&ClientMessage::Heartbeat);
        if let Err(e) = socket.send(&frames).await {
            error!("Failed to send heartbeat: {}", e);
            if e.is_connection_lost() {
                self.connection_lost(e);
            }
        }
    }

    fn handle_inbound(&mut self, frames: Frames) {
        let message = match envelope::decode_client(&frames) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed reply ({} frames): {}", frames.len(), e);
                return;
            }
        };

        let (request_id, payload) = match message {
            ClientMessage::Heartbeat => {
                let _ = self.events.send(ClientEvent::Heartbeat);
                return;
            }
            ClientMessage::Call {
                request_id, payload, ..
            } => (request_id, payload),
        };

        let Some(request) = self.table.take(&request_id) else {
            warn!("Received reply for unknown request {}", request_id);
            return;
        };
        let result = self.interpret(&request, &payload);
        request.complete(result);
    }

    fn interpret(&self, request: &PendingRequest, payload: &[u8]) -> RpcResult<Value> {
        let id = request.id.clone();
        match request.kind {
            ReplyKind::Raw => Ok(Value::String(String::from_utf8_lossy(payload).into_owned())),
            ReplyKind::Call => match self.config.codec.decode::<ReplyPayload>(payload) {
                Ok(reply) => reply.into_result().map_err(|message| RpcError::Protocol {
                    id,
                    message: format!("RPC call failed: {}", message),
                }),
                Err(e) => Err(RpcError::Protocol {
                    id,
                    message: format!("failed to decode reply: {}", e),
                }),
            },
        }
    }

    fn expire(&mut self) {
        for id in self.table.expire(Instant::now(), self.config.timeout) {
            warn!(
                "Request {} timed out after {}ms",
                id,
                self.config.timeout.as_millis()
            );
        }
    }

    fn connection_lost(&mut self, error: MajordomoError) {
        if self.socket.take().is_none() {
            return;
        }
        warn!("Connection to broker lost: {}", error);
        self.shared.connected.store(false, Ordering::Relaxed);
        let _ = self.events.send(ClientEvent::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.socket.is_none() && self.connecting.is_none() && self.reconnect_at.is_none() {
            self.reconnect_at = Some(Instant::now() + self.config.reconnect_interval);
        }
    }

    fn shutdown(&mut self) {
        let rejected = self.table.drain();
        if rejected > 0 {
            info!("Rejected {} pending requests on shutdown", rejected);
        }
        self.socket = None;
        self.connecting = None;
        self.shared.connected.store(false, Ordering::Relaxed);
        self.shared.pending.store(0, Ordering::Relaxed);
    }
}

async fn recv_from(socket: &mut Option<DealerSocket>) -> Result<Frames> {
    match socket {
        Some(socket) => socket.recv().await,
        None => std::future::pending().await,
    }
}

async fn connect_from(
    connecting: &mut Option<BoxFuture<'static, Result<DealerSocket>>>,
) -> Result<DealerSocket> {
    match connecting {
        Some(attempt) => attempt.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use majordomo_common::codec::Codec;
use majordomo_common::config::WorkerConfig;
use majordomo_common::liveness::{HeartbeatTimer, Liveness};
use majordomo_common::protocol::envelope::{self, Frames, WorkerMessage};
use majordomo_common::protocol::error::{MajordomoError, Result};
use majordomo_common::protocol::{
    is_internal_service, CallPayload, HealthRecord, Kwargs, ReplyPayload, RequestId, HEALTH_METHOD,
    PING_ACK, PING_METHOD,
};
use majordomo_common::transport::DealerSocket;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::handler::{HandlerError, HandlerRegistry, HandlerResult};

/// Builder for [`Worker`].
///
/// # Example
///
/// ```no_run
/// use majordomo_common::WorkerConfig;
/// use majordomo_worker::{HandlerError, Worker};
/// use serde_json::{json, Value};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let worker = Worker::builder(WorkerConfig::new("tcp://127.0.0.1:5555", "account"))
///     .handler("get_balance", |args: Vec<Value>, _kwargs| async move {
///         let account = args.first().and_then(Value::as_str).unwrap_or("unknown");
///         Ok::<_, HandlerError>(json!({ "account": account, "balance": 100 }))
///     })
///     .build();
///
/// worker.start().await?;
/// tokio::signal::ctrl_c().await?;
/// worker.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct WorkerBuilder {
    config: WorkerConfig,
    handlers: HandlerRegistry,
}

impl WorkerBuilder {
    /// Registers a handler for `method`.
    ///
    /// `ping` and `get_health` are answered by the worker itself and cannot
    /// be overridden.
    pub fn handler<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>, Kwargs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.register(method, handler);
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn build(self) -> Worker {
        Worker {
            config: self.config,
            handlers: Arc::new(self.handlers),
            running: Mutex::new(None),
            shared: Arc::new(SharedState::default()),
        }
    }
}

#[derive(Debug, Default)]
struct SharedState {
    connected: AtomicBool,
    handled: AtomicU64,
}

enum WorkerCommand {
    Stop,
}

struct Running {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    task: JoinHandle<()>,
}

/// Majordomo worker
///
/// Registers under one service name and answers the calls the broker
/// assigns to it.
///
/// # Architecture
///
/// One event loop task owns the connection. It multiplexes:
///
/// - requests from the broker, each executed on its own task so that
///   heartbeats keep flowing while a handler runs
/// - completed replies from those tasks
/// - the heartbeat timer
/// - the broker liveness deadline
/// - the reconnect timer and the pending connect attempt while disconnected
///
/// On DISCONNECT from the broker, a failed connection, or broker silence
/// longer than `heartbeat_interval * liveness`, the worker drops the
/// connection, waits `reconnect_interval` and registers again.
///
/// # Built-in methods
///
/// - `ping` returns `"pong"`
/// - `get_health` returns a [`HealthRecord`]
pub struct Worker {
    config: WorkerConfig,
    handlers: Arc<HandlerRegistry>,
    running: Mutex<Option<Running>>,
    shared: Arc<SharedState>,
}

impl Worker {
    pub fn builder(config: WorkerConfig) -> WorkerBuilder {
        WorkerBuilder {
            config,
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn service(&self) -> &str {
        &self.config.service
    }

    /// Starts the event loop, which connects, registers and answers requests.
    ///
    /// Returns without waiting for the connection. An unreachable broker is
    /// retried every `reconnect_interval`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The worker is already active ([`MajordomoError::AlreadyStarted`])
    /// - `broker_url` is not a valid `tcp://host:port` endpoint
    /// - The service name is reserved for broker-internal services
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(MajordomoError::AlreadyStarted);
        }
        self.config
            .broker_url
            .parse::<majordomo_common::transport::Endpoint>()?;
        if is_internal_service(&self.config.service) {
            return Err(MajordomoError::Transport(format!(
                "service name '{}' is reserved",
                self.config.service
            )));
        }

        let (commands, mailbox) = mpsc::unbounded_channel();
        let (completed_tx, completed) = mpsc::unbounded_channel();
        let mut worker_loop = WorkerLoop {
            config: self.config.clone(),
            handlers: self.handlers.clone(),
            socket: None,
            broker_liveness: Liveness::new(Instant::now()),
            reconnect_at: None,
            connecting: None,
            mailbox,
            completed_tx,
            completed,
            shared: self.shared.clone(),
            started_at: Instant::now(),
        };
        worker_loop.begin_connect();

        let task = tokio::spawn(worker_loop.run());
        *running = Some(Running { commands, task });
        info!(
            "Worker for service '{}' started against {}",
            self.config.service, self.config.broker_url
        );
        Ok(())
    }

    /// Sends DISCONNECT to the broker and closes the connection.
    ///
    /// Requests still executing are abandoned. Stopping an inactive worker
    /// does nothing.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        let _ = running.commands.send(WorkerCommand::Stop);
        if let Err(e) = running.task.await {
            error!("Worker event loop failed: {}", e);
        }
        info!("Worker for service '{}' stopped", self.config.service);
    }

    pub async fn is_active(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Requests answered since the worker was built.
    pub fn handled_requests(&self) -> u64 {
        self.shared.handled.load(Ordering::Relaxed)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.task.abort();
        }
    }
}

/// A finished request waiting to be written back
struct Completed {
    client: Bytes,
    request_id: RequestId,
    payload: Bytes,
}

struct WorkerLoop {
    config: WorkerConfig,
    handlers: Arc<HandlerRegistry>,
    socket: Option<DealerSocket>,
    broker_liveness: Liveness,
    reconnect_at: Option<Instant>,
    connecting: Option<BoxFuture<'static, Result<DealerSocket>>>,
    mailbox: mpsc::UnboundedReceiver<WorkerCommand>,
    completed_tx: mpsc::UnboundedSender<Completed>,
    completed: mpsc::UnboundedReceiver<Completed>,
    shared: Arc<SharedState>,
    started_at: Instant,
}

impl WorkerLoop {
    async fn run(mut self) {
        let mut heartbeat = HeartbeatTimer::new(self.config.heartbeat_interval);

        loop {
            let broker_deadline = self
                .socket
                .as_ref()
                .map(|_| self.broker_liveness.last_seen() + self.config.liveness_timeout());

            tokio::select! {
                command = self.mailbox.recv() => match command {
                    Some(WorkerCommand::Stop) | None => break,
                },
                inbound = recv_from(&mut self.socket) => match inbound {
                    Ok(frames) => self.handle_inbound(frames),
                    Err(e) => self.connection_lost(&e.to_string()),
                },
                Some(done) = self.completed.recv() => self.send_reply(done).await,
                _ = heartbeat.tick() => self.send(WorkerMessage::Heartbeat).await,
                _ = sleep_until_some(broker_deadline) => {
                    self.connection_lost("broker heartbeat expired");
                }
                _ = sleep_until_some(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.begin_connect();
                }
                result = connect_from(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connected(result).await;
                }
            }
        }

        self.shutdown().await;
    }

    fn begin_connect(&mut self) {
        if self.socket.is_some() || self.connecting.is_some() {
            return;
        }
        let url = self.config.broker_url.clone();
        let limit = self.config.connect_timeout;
        self.connecting = Some(async move { DealerSocket::connect_timeout(&url, limit).await }.boxed());
    }

    /// Registers the service on a fresh connection.
    async fn on_connected(&mut self, result: Result<DealerSocket>) {
        let mut socket = match result {
            Ok(socket) => socket,
            Err(e) => {
                warn!("Connection to {} failed: {}", self.config.broker_url, e);
                self.schedule_reconnect();
                return;
            }
        };

        let ready = envelope::encode_worker(&WorkerMessage::Ready {
            service: self.config.service.clone(),
        });
        if let Err(e) = socket.send(&ready).await {
            warn!("Failed to register with {}: {}", self.config.broker_url, e);
            self.schedule_reconnect();
            return;
        }

        info!(
            "Registered service '{}' with broker at {}",
            self.config.service, self.config.broker_url
        );
        self.socket = Some(socket);
        self.broker_liveness = Liveness::new(Instant::now());
        self.shared.connected.store(true, Ordering::Relaxed);
    }

    fn handle_inbound(&mut self, frames: Frames) {
        let message = match envelope::decode_worker(&frames) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed message ({} frames): {}", frames.len(), e);
                return;
            }
        };
        self.broker_liveness.touch(Instant::now());

        match message {
            WorkerMessage::Request {
                client,
                request_id,
                payload,
            } => self.execute(client, request_id, payload),
            WorkerMessage::Heartbeat => {}
            WorkerMessage::Disconnect => {
                warn!("Broker requested disconnect, re-registering");
                self.connection_lost("disconnect requested by broker");
            }
            other => warn!("Unexpected {} from broker", other.command().name()),
        }
    }

    fn execute(&self, client: Bytes, request_id: RequestId, payload: Bytes) {
        debug!("Executing request {}", request_id);
        let handlers = self.handlers.clone();
        let codec = self.config.codec;
        let service = self.config.service.clone();
        let started_at = self.started_at;
        let shared = self.shared.clone();
        let completed = self.completed_tx.clone();

        tokio::spawn(async move {
            let reply = match codec.decode::<CallPayload>(&payload) {
                Ok(call) => {
                    let handled = shared.handled.load(Ordering::Relaxed);
                    let result = invoke(&handlers, &service, started_at, handled, call).await;
                    to_reply(result)
                }
                Err(e) => ReplyPayload::err(format!("failed to decode call: {}", e)),
            };
            shared.handled.fetch_add(1, Ordering::Relaxed);

            let payload = encode_reply(codec, &reply);
            let _ = completed.send(Completed {
                client,
                request_id,
                payload,
            });
        });
    }

    async fn send_reply(&mut self, done: Completed) {
        if self.socket.is_none() {
            warn!("Dropping reply to request {}: not connected", done.request_id);
            return;
        }
        debug!("Replying to request {}", done.request_id);
        self.send(WorkerMessage::Reply {
            client: done.client,
            request_id: done.request_id,
            payload: done.payload,
        })
        .await;
    }

    async fn send(&mut self, message: WorkerMessage) {
        let Some(socket) = self.socket.as_mut() else {
            return;
        };
        if let Err(e) = socket.send(&envelope::encode_worker(&message)).await {
            error!("Failed to send {}: {}", message.command().name(), e);
            if e.is_connection_lost() {
                self.connection_lost(&e.to_string());
            }
        }
    }

    fn connection_lost(&mut self, reason: &str) {
        if self.socket.take().is_none() {
            return;
        }
        warn!("Connection to broker lost: {}", reason);
        self.shared.connected.store(false, Ordering::Relaxed);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.socket.is_none() && self.connecting.is_none() && self.reconnect_at.is_none() {
            self.reconnect_at = Some(Instant::now() + self.config.reconnect_interval);
        }
    }

    async fn shutdown(&mut self) {
        self.send(WorkerMessage::Disconnect).await;
        self.socket = None;
        self.connecting = None;
        self.shared.connected.store(false, Ordering::Relaxed);
    }
}

/// Runs a call, answering the built-in methods before user handlers.
async fn invoke(
    handlers: &HandlerRegistry,
    service: &str,
    started_at: Instant,
    handled: u64,
    call: CallPayload,
) -> HandlerResult {
    match call.method.as_str() {
        PING_METHOD => Ok(Value::String(PING_ACK.to_string())),
        HEALTH_METHOD => {
            let uptime_ms = started_at.elapsed().as_millis() as u64;
            let record = HealthRecord::healthy(service, uptime_ms, handled)
                .with_message(format!("{} handlers registered", handlers.methods().len()));
            serde_json::to_value(record).map_err(|e| HandlerError::new(e.to_string()))
        }
        method => handlers.dispatch(method, call.args, call.kwargs).await,
    }
}

fn to_reply(result: HandlerResult) -> ReplyPayload {
    match result {
        Ok(value) => ReplyPayload::ok(value),
        Err(e) => ReplyPayload::err(e.to_string()),
    }
}

fn encode_reply(codec: Codec, reply: &ReplyPayload) -> Bytes {
    match codec.encode(reply) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to encode reply: {}", e);
            codec
                .encode(&ReplyPayload::err(format!("failed to encode reply: {}", e)))
                .unwrap_or_default()
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_builtins_answered_before_handlers() {
        let mut handlers = HandlerRegistry::new();
        handlers.register("ping", |_args: Vec<Value>, _kwargs: Kwargs| async move {
            Ok::<_, HandlerError>(json!("overridden"))
        });

        let ping = CallPayload::new(PING_METHOD, vec![], Kwargs::new());
        let result = invoke(&handlers, "echo", Instant::now(), 0, ping).await;
        assert_eq!(result, Ok(json!("pong")));
    }

    #[tokio::test]
    async fn test_health_record() {
        let mut handlers = HandlerRegistry::new();
        handlers.register("echo", |args: Vec<Value>, _kwargs: Kwargs| async move {
            Ok::<_, HandlerError>(Value::Array(args))
        });
        let call = CallPayload::new(HEALTH_METHOD, vec![], Kwargs::new());
        let value = invoke(&handlers, "account", Instant::now(), 7, call)
            .await
            .unwrap();

        let record: HealthRecord = serde_json::from_value(value).unwrap();
        assert!(record.healthy);
        assert_eq!(record.service, "account");
        assert_eq!(record.handled_requests, 7);
        assert_eq!(record.message.as_deref(), Some("1 handlers registered"));
    }

    #[tokio::test]
    async fn test_unknown_method_becomes_failed_reply() {
        let handlers = HandlerRegistry::new();
        let call = CallPayload::new("missing", vec![], Kwargs::new());
        let reply = to_reply(invoke(&handlers, "echo", Instant::now(), 0, call).await);
        assert!(!reply.success);
        assert_eq!(reply.value, json!("unknown method 'missing'"));
    }

    #[test]
    fn test_encode_reply_shape() {
        let payload = encode_reply(Codec::Json, &ReplyPayload::ok(json!({"n": 1})));
        assert_eq!(payload.as_ref(), br#"[true,{"n":1}]"#);
    }
}

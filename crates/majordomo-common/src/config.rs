//! Configuration for clients, brokers and workers
//!
//! Plain structs with defaults and `with_*` setters. Durations are
//! `std::time::Duration`; endpoints use the `tcp://host:port` form
//! understood by [`crate::transport::Endpoint`].

use std::time::Duration;

use crate::codec::Codec;

pub const DEFAULT_BROKER_URL: &str = "tcp://localhost:5555";
pub const DEFAULT_BROKER_BIND: &str = "tcp://*:5555";
pub const DEFAULT_PUBLISH_BIND: &str = "tcp://*:5556";

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(2500);
pub const DEFAULT_LIVENESS: u32 = 2;
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(1000);
/// Upper bound on one TCP connect attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// RPC client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub broker_url: String,
    /// Per-call budget, measured from the first send
    pub timeout: Duration,
    /// Resends allowed after reconnects before a call is left to time out
    pub retries: u32,
    pub heartbeat_interval: Duration,
    pub reconnect_interval: Duration,
    /// Upper bound on one connect attempt; a hung attempt is retried
    pub connect_timeout: Duration,
    /// Period of the backstop sweep over the request table
    pub sweep_interval: Duration,
    pub codec: Codec,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            timeout: Duration::from_millis(5000),
            retries: 3,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            sweep_interval: Duration::from_secs(1),
            codec: Codec::Json,
        }
    }
}

impl ClientConfig {
    pub fn new(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Request/reply endpoint shared by clients and workers
    pub bind: String,
    /// Fan-out endpoint; `None` disables publishing
    pub publish_bind: Option<String>,
    pub heartbeat_interval: Duration,
    /// Heartbeat intervals a worker may stay silent before eviction
    pub liveness: u32,
    pub liveness_sweep_interval: Duration,
    /// Maximum age of a call waiting for a worker
    pub backlog_ttl: Duration,
    /// Period of the backlog TTL sweep; a queued call lives at most
    /// `backlog_ttl + backlog_sweep_interval`
    pub backlog_sweep_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BROKER_BIND.to_string(),
            publish_bind: Some(DEFAULT_PUBLISH_BIND.to_string()),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            liveness: DEFAULT_LIVENESS,
            liveness_sweep_interval: Duration::from_secs(1),
            backlog_ttl: Duration::from_secs(30),
            backlog_sweep_interval: Duration::from_secs(1),
        }
    }
}

impl BrokerConfig {
    pub fn new(bind: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            ..Self::default()
        }
    }

    /// Silence after which a worker is evicted.
    pub fn liveness_timeout(&self) -> Duration {
        self.heartbeat_interval * self.liveness
    }

    pub fn with_publish_bind(mut self, bind: Option<String>) -> Self {
        self.publish_bind = bind;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_liveness(mut self, liveness: u32) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn with_liveness_sweep_interval(mut self, interval: Duration) -> Self {
        self.liveness_sweep_interval = interval;
        self
    }

    pub fn with_backlog_ttl(mut self, ttl: Duration) -> Self {
        self.backlog_ttl = ttl;
        self
    }

    pub fn with_backlog_sweep_interval(mut self, interval: Duration) -> Self {
        self.backlog_sweep_interval = interval;
        self
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub broker_url: String,
    pub service: String,
    pub heartbeat_interval: Duration,
    /// Heartbeat intervals the broker may stay silent before reconnecting
    pub liveness: u32,
    pub reconnect_interval: Duration,
    /// Upper bound on one connect attempt; a hung attempt is retried
    pub connect_timeout: Duration,
    pub codec: Codec,
}

impl WorkerConfig {
    pub fn new(broker_url: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            service: service.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            liveness: DEFAULT_LIVENESS,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            codec: Codec::Json,
        }
    }

    pub fn liveness_timeout(&self) -> Duration {
        self.heartbeat_interval * self.liveness
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_liveness(mut self, liveness: u32) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.broker_url, "tcp://localhost:5555");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.retries, 3);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(2500));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.codec, Codec::Json);
    }

    #[test]
    fn test_broker_liveness_timeout() {
        let config = BrokerConfig::default();
        assert_eq!(config.liveness_timeout(), Duration::from_secs(5));
        assert_eq!(config.backlog_ttl, Duration::from_secs(30));
        assert_eq!(config.backlog_sweep_interval, Duration::from_secs(1));

        let tuned = config
            .with_heartbeat_interval(Duration::from_millis(100))
            .with_liveness(3);
        assert_eq!(tuned.liveness_timeout(), Duration::from_millis(300));
    }

    #[test]
    fn test_worker_builder() {
        let config = WorkerConfig::new("tcp://127.0.0.1:7000", "auth")
            .with_reconnect_interval(Duration::from_millis(50))
            .with_codec(Codec::MsgPack);
        assert_eq!(config.service, "auth");
        assert_eq!(config.reconnect_interval, Duration::from_millis(50));
        assert_eq!(config.liveness_timeout(), Duration::from_secs(5));
    }
}

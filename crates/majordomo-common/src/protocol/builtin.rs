//! Built-in methods and introspection records
//!
//! Every worker answers two methods regardless of its service: a liveness
//! probe and a health probe. The broker additionally answers the `mmi.*`
//! internal services itself. This module fixes the names and record shapes
//! of both so that clients, workers and the broker agree on them.

use serde::{Deserialize, Serialize};

// ============================================================================
// Worker introspection
// ============================================================================

/// Liveness probe method answered by every worker.
pub const PING_METHOD: &str = "ping";

/// Fixed acknowledgement returned by [`PING_METHOD`].
pub const PING_ACK: &str = "pong";

/// Health probe method answered by every worker.
pub const HEALTH_METHOD: &str = "get_health";

/// Health record returned by [`HEALTH_METHOD`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthRecord {
    pub healthy: bool,
    /// Service the worker is registered under
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Milliseconds since the worker started
    pub uptime_ms: u64,
    /// Requests answered since the worker started, built-ins included
    pub handled_requests: u64,
}

impl HealthRecord {
    pub fn healthy(service: impl Into<String>, uptime_ms: u64, handled_requests: u64) -> Self {
        Self {
            healthy: true,
            service: service.into(),
            message: None,
            uptime_ms,
            handled_requests,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ============================================================================
// Broker internal services
// ============================================================================

/// Prefix reserved for services answered by the broker itself.
pub const MMI_PREFIX: &str = "mmi.";

/// Service discovery: the payload is a service name, the reply one of the
/// `MMI_*` status codes below.
pub const MMI_SERVICE: &str = "mmi.service";

pub const MMI_FOUND: &str = "200";
pub const MMI_NOT_FOUND: &str = "404";
pub const MMI_NOT_IMPLEMENTED: &str = "501";

pub fn is_internal_service(service: &str) -> bool {
    service.starts_with(MMI_PREFIX)
}

// ============================================================================
// Broker statistics
// ============================================================================

/// Point-in-time view of one service in the broker's registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceStats {
    pub name: String,
    pub idle_workers: usize,
    pub busy_workers: usize,
    /// Calls waiting for a worker
    pub backlog: usize,
}

/// Snapshot returned by the broker's stats query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BrokerStats {
    pub uptime_ms: u64,
    pub workers: usize,
    pub services: Vec<ServiceStats>,
    /// Connections on the publish endpoint
    #[serde(default)]
    pub subscribers: usize,
}

impl BrokerStats {
    pub fn service(&self, name: &str) -> Option<&ServiceStats> {
        self.services.iter().find(|s| s.name == name)
    }
}

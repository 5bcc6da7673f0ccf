use std::time::Duration;

use bytes::Bytes;
use majordomo_common::liveness::Liveness;
use tokio::time::Instant;

/// Dispatch state of a registered worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Idle, sitting in its service's available queue
    Ready,
    /// Assigned a request, out of the available queue until it replies
    Busy,
}

/// A worker known to the broker
#[derive(Debug, Clone)]
pub struct WorkerEntry {
    /// Routing identity of the worker's connection
    pub identity: Bytes,
    pub service: String,
    pub state: WorkerState,
    pub liveness: Liveness,
    pub registered_at: Instant,
    /// Replies received from this worker
    pub replies: u64,
}

impl WorkerEntry {
    pub fn new(identity: Bytes, service: impl Into<String>, now: Instant) -> Self {
        Self {
            identity,
            service: service.into(),
            state: WorkerState::Ready,
            liveness: Liveness::new(now),
            registered_at: now,
            replies: 0,
        }
    }

    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.liveness.is_expired(now, timeout)
    }

    pub fn is_busy(&self) -> bool {
        self.state == WorkerState::Busy
    }
}

/// Printable form of a routing identity for logs.
pub fn display_identity(identity: &[u8]) -> String {
    identity.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_creation() {
        let now = Instant::now();
        let worker = WorkerEntry::new(Bytes::from_static(b"\x00\x00\x00\x00\x01"), "auth", now);
        assert_eq!(worker.service, "auth");
        assert_eq!(worker.state, WorkerState::Ready);
        assert!(!worker.is_busy());
        assert_eq!(worker.replies, 0);
        assert_eq!(worker.liveness.last_seen(), now);
    }

    #[test]
    fn test_worker_expiry() {
        let now = Instant::now();
        let worker = WorkerEntry::new(Bytes::from_static(b"w"), "auth", now);
        let timeout = Duration::from_secs(5);
        assert!(!worker.is_expired(now + Duration::from_secs(5), timeout));
        assert!(worker.is_expired(now + Duration::from_secs(6), timeout));
    }

    #[test]
    fn test_display_identity() {
        assert_eq!(display_identity(b"\x00\x00\x00\x00\x2a"), "000000002a");
    }
}

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use majordomo_common::protocol::{is_internal_service, RequestId, ServiceStats};
use thiserror::Error;
use tokio::time::Instant;

use crate::worker::{WorkerEntry, WorkerState};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("worker is already registered for service '{0}'")]
    AlreadyRegistered(String),

    #[error("service name '{0}' is reserved")]
    ReservedService(String),
}

/// A client call waiting for, or assigned to, a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRequest {
    /// Return address of the calling client
    pub client: Bytes,
    pub request_id: RequestId,
    pub payload: Bytes,
    pub queued_at: Instant,
}

/// A request paired with the worker that must receive it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub worker: Bytes,
    pub request: QueuedRequest,
}

#[derive(Debug, Default)]
struct Service {
    /// Idle workers in round-robin order; each identity at most once
    available: VecDeque<Bytes>,
    /// Calls waiting for a worker, oldest first
    backlog: VecDeque<QueuedRequest>,
    workers: usize,
}

impl Service {
    fn is_unused(&self) -> bool {
        self.workers == 0 && self.backlog.is_empty()
    }
}

/// Per-service pools of workers plus the backlog of calls awaiting one.
///
/// Owned by the broker's event loop; every mutation happens there.
///
/// # Round-robin
///
/// A worker is popped from the head of its service's available queue when
/// it is assigned a call and re-appended to the tail only after its reply,
/// so with N idle workers N consecutive calls go to N different workers.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: HashMap<Bytes, WorkerEntry>,
    services: HashMap<String, Service>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a worker as idle for `service`.
    ///
    /// The caller should follow up with [`dispatch`](Self::dispatch) to
    /// hand it any backlog.
    ///
    /// # Arguments
    ///
    /// * `identity` - Routing identity of the worker's connection
    /// * `service` - Service the worker answers for
    /// * `now` - Registration time, also the worker's first proof of life
    ///
    /// # Errors
    ///
    /// - [`RegistryError::AlreadyRegistered`] if the identity sent READY before
    /// - [`RegistryError::ReservedService`] for `mmi.*` names
    pub fn register(&mut self, identity: Bytes, service: &str, now: Instant) -> Result<(), RegistryError> {
        if let Some(existing) = self.workers.get(&identity) {
            return Err(RegistryError::AlreadyRegistered(existing.service.clone()));
        }
        if is_internal_service(service) {
            return Err(RegistryError::ReservedService(service.to_string()));
        }

        let entry = self.services.entry(service.to_string()).or_default();
        entry.available.push_back(identity.clone());
        entry.workers += 1;
        self.workers
            .insert(identity.clone(), WorkerEntry::new(identity, service, now));
        Ok(())
    }

    pub fn contains(&self, identity: &[u8]) -> bool {
        self.workers.contains_key(identity)
    }

    pub fn worker(&self, identity: &[u8]) -> Option<&WorkerEntry> {
        self.workers.get(identity)
    }

    /// Records proof of life. Returns false for unknown workers.
    pub fn touch(&mut self, identity: &[u8], now: Instant) -> bool {
        match self.workers.get_mut(identity) {
            Some(worker) => {
                worker.liveness.touch(now);
                true
            }
            None => false,
        }
    }

    /// Takes the head of the available queue for `service` and marks it busy.
    pub fn next_worker(&mut self, service: &str) -> Option<Bytes> {
        let identity = self.services.get_mut(service)?.available.pop_front()?;
        if let Some(worker) = self.workers.get_mut(&identity) {
            worker.state = WorkerState::Busy;
        }
        Some(identity)
    }

    /// Marks a worker idle again after a reply and appends it to the tail of
    /// its service's available queue. Returns the worker's service.
    pub fn release(&mut self, identity: &[u8], now: Instant) -> Option<String> {
        let worker = self.workers.get_mut(identity)?;
        worker.liveness.touch(now);
        worker.replies += 1;

        if worker.state == WorkerState::Busy {
            worker.state = WorkerState::Ready;
            if let Some(service) = self.services.get_mut(&worker.service) {
                service.available.push_back(worker.identity.clone());
            }
        }
        Some(worker.service.clone())
    }

    /// Forgets a worker. Work already forwarded to it is not requeued.
    pub fn remove(&mut self, identity: &[u8]) -> Option<WorkerEntry> {
        let worker = self.workers.remove(identity)?;
        if let Some(service) = self.services.get_mut(&worker.service) {
            service.available.retain(|w| w.as_ref() != identity);
            service.workers = service.workers.saturating_sub(1);
            if service.is_unused() {
                self.services.remove(&worker.service);
            }
        }
        Some(worker)
    }

    /// Appends a call to the backlog of `service`.
    pub fn enqueue(&mut self, service: &str, request: QueuedRequest) {
        self.services
            .entry(service.to_string())
            .or_default()
            .backlog
            .push_back(request);
    }

    /// Pairs backlog entries with idle workers, oldest call first.
    pub fn dispatch(&mut self, service: &str) -> Vec<Dispatch> {
        let mut dispatched = Vec::new();
        loop {
            let Some(entry) = self.services.get_mut(service) else {
                break;
            };
            if entry.backlog.is_empty() || entry.available.is_empty() {
                break;
            }
            let Some(request) = entry.backlog.pop_front() else {
                break;
            };
            let Some(worker) = self.next_worker(service) else {
                break;
            };
            dispatched.push(Dispatch { worker, request });
        }
        dispatched
    }

    /// Routes a new call: straight to the next idle worker, or behind any
    /// older calls in the backlog.
    ///
    /// # Arguments
    ///
    /// * `service` - Target service; created on first use
    /// * `request` - The call, stamped with its queueing time
    ///
    /// # Returns
    ///
    /// The pairing to forward, or `None` if the call stays queued. With an
    /// older backlog the returned request may not be `request` itself.
    pub fn submit(&mut self, service: &str, request: QueuedRequest) -> Option<Dispatch> {
        self.enqueue(service, request);
        self.dispatch(service).pop()
    }

    /// Removes every worker silent for longer than `timeout`.
    pub fn purge_expired(&mut self, now: Instant, timeout: Duration) -> Vec<WorkerEntry> {
        let expired: Vec<Bytes> = self
            .workers
            .values()
            .filter(|w| w.is_expired(now, timeout))
            .map(|w| w.identity.clone())
            .collect();

        expired
            .iter()
            .filter_map(|identity| self.remove(identity))
            .collect()
    }

    /// Drops backlog entries older than `ttl` without notifying anyone.
    /// Returns how many were dropped.
    pub fn purge_backlog(&mut self, now: Instant, ttl: Duration) -> usize {
        let mut dropped = 0;
        for service in self.services.values_mut() {
            let before = service.backlog.len();
            service
                .backlog
                .retain(|r| now.saturating_duration_since(r.queued_at) <= ttl);
            dropped += before - service.backlog.len();
        }
        self.services.retain(|_, s| !s.is_unused());
        dropped
    }

    /// True when at least one worker is registered for `service`.
    pub fn has_service(&self, service: &str) -> bool {
        self.services.get(service).is_some_and(|s| s.workers > 0)
    }

    pub fn worker_identities(&self) -> Vec<Bytes> {
        self.workers.keys().cloned().collect()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn available_count(&self, service: &str) -> usize {
        self.services.get(service).map_or(0, |s| s.available.len())
    }

    pub fn backlog_len(&self, service: &str) -> usize {
        self.services.get(service).map_or(0, |s| s.backlog.len())
    }

    /// Per-service counts, sorted by service name.
    pub fn snapshot(&self) -> Vec<ServiceStats> {
        let mut stats: Vec<ServiceStats> = self
            .services
            .iter()
            .map(|(name, service)| ServiceStats {
                name: name.clone(),
                idle_workers: service.available.len(),
                busy_workers: service.workers - service.available.len(),
                backlog: service.backlog.len(),
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

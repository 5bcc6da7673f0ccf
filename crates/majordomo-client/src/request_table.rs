use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use majordomo_common::protocol::{Kwargs, RequestId};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{RpcError, RpcResult};

/// How the reply payload of a request is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// A `[success, value]` reply from a worker
    Call,
    /// A bare UTF-8 status answered by the broker itself
    Raw,
}

/// State of one outstanding call.
///
/// The completion slot is a oneshot sender that is consumed on
/// resolution, so a request can be completed at most once.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: RequestId,
    pub service: String,
    pub method: String,
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
    pub created_at: Instant,
    /// Resends performed after reconnects
    pub attempt: u32,
    /// Whether the envelope has been written at least once
    pub sent: bool,
    pub kind: ReplyKind,
    /// Encoded `[method, args, kwargs]`, reused on every send
    pub payload: Bytes,
    completion: oneshot::Sender<RpcResult<Value>>,
}

impl PendingRequest {
    pub fn new(
        id: RequestId,
        service: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
        kwargs: Kwargs,
        kind: ReplyKind,
        payload: Bytes,
    ) -> (Self, oneshot::Receiver<RpcResult<Value>>) {
        let (completion, rx) = oneshot::channel();
        let request = Self {
            id,
            service: service.into(),
            method: method.into(),
            args,
            kwargs,
            created_at: Instant::now(),
            attempt: 0,
            sent: false,
            kind,
            payload,
            completion,
        };
        (request, rx)
    }

    pub fn deadline(&self, timeout: Duration) -> Instant {
        self.created_at + timeout
    }

    /// Resolves the caller. A caller that stopped waiting is ignored.
    pub fn complete(self, result: RpcResult<Value>) {
        let _ = self.completion.send(result);
    }
}

/// Correlation map from request id to pending call state.
///
/// Every exit path (reply, expiry, drain) removes the entry before
/// completing it, which is what makes resolution at-most-once.
#[derive(Debug, Default)]
pub struct RequestTable {
    entries: HashMap<RequestId, PendingRequest>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, request: PendingRequest) {
        self.entries.insert(request.id.clone(), request);
    }

    /// Removes the entry for a reply. `None` for unknown or already
    /// resolved ids.
    pub fn take(&mut self, id: &RequestId) -> Option<PendingRequest> {
        self.entries.remove(id)
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    /// Rejects every request older than `timeout` with
    /// [`RpcError::Timeout`] and returns their ids.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<RequestId> {
        let expired: Vec<RequestId> = self
            .entries
            .values()
            .filter(|r| now >= r.deadline(timeout))
            .map(|r| r.id.clone())
            .collect();

        for id in &expired {
            if let Some(request) = self.entries.remove(id) {
                request.complete(Err(RpcError::Timeout {
                    id: id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }));
            }
        }
        expired
    }

    /// Earliest deadline among outstanding requests.
    pub fn next_deadline(&self, timeout: Duration) -> Option<Instant> {
        self.entries.values().map(|r| r.deadline(timeout)).min()
    }

    /// Rejects every outstanding request with [`RpcError::ShuttingDown`].
    pub fn drain(&mut self) -> usize {
        let count = self.entries.len();
        for (id, request) in self.entries.drain() {
            request.complete(Err(RpcError::ShuttingDown { id }));
        }
        count
    }

    /// Requests to write after a (re)connect, oldest first: those never
    /// sent, and those whose resend budget is not exhausted.
    ///
    /// Nothing is marked here; call [`mark_sent`](Self::mark_sent) for each
    /// request once its write succeeded.
    pub fn sendable(&self, retries: u32) -> Vec<(String, RequestId, Bytes)> {
        let mut sendable: Vec<&PendingRequest> = self
            .entries
            .values()
            .filter(|r| !r.sent || r.attempt < retries)
            .collect();
        sendable.sort_by_key(|r| r.created_at);

        sendable
            .into_iter()
            .map(|r| (r.service.clone(), r.id.clone(), r.payload.clone()))
            .collect()
    }

    /// Records a successful write. A repeated write counts against the
    /// resend budget. Returns `false` if the request already resolved.
    pub fn mark_sent(&mut self, id: &RequestId) -> bool {
        let Some(request) = self.entries.get_mut(id) else {
            return false;
        };
        if request.sent {
            request.attempt += 1;
        }
        request.sent = true;
        true
    }

    pub fn get_mut(&mut self, id: &RequestId) -> Option<&mut PendingRequest> {
        self.entries.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

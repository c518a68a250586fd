//! Request/response correlation over agent channels
//!
//! Every relayed request gets a unique [`RequestId`]. The agent answers with
//! events carrying the same id. Only the terminal event matching the
//! request's [`RequestKind`] wakes the waiting [`PendingHandle`]; any other
//! terminal event for that id is ignored.
//! The pending entry is removed on every exit path, so replies that arrive
//! after a timeout find nothing and are ignored.

use crate::error::HubError;
use crate::value_objects::ApiReply;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier correlating a relayed request with its replies
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a pending request waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestKind {
    /// API command; completes on `api-command-complete`
    Command,
    /// Direct chat; completes on `chat-message-sent`
    ChatSend,
    /// Info snapshot; completes on `info-response`
    Info,
}

/// Result of a request that completed before its deadline
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRequest {
    pub id: RequestId,
    pub kind: RequestKind,
    pub responses: Vec<ApiReply>,
    pub sent: bool,
    pub info: Option<Value>,
    /// Time between dispatch and completion
    pub elapsed: Duration,
}

struct PendingRequest {
    kind: RequestKind,
    responses: Vec<ApiReply>,
    completed: bool,
    sent: bool,
    info: Option<Value>,
    started_at: Instant,
    waker: Option<oneshot::Sender<()>>,
}

impl PendingRequest {
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            let _ = waker.send(());
        }
    }

    fn is_finished(&self) -> bool {
        match self.kind {
            RequestKind::Command => self.completed,
            RequestKind::ChatSend => self.sent,
            RequestKind::Info => self.info.is_some(),
        }
    }
}

/// Table of outstanding requests
#[derive(Default)]
pub struct RequestCorrelator {
    counter: AtomicU64,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending request and return the handle that waits for it
    pub fn open(self: &Arc<Self>, kind: RequestKind) -> PendingHandle {
        let id = self.next_id();
        let (waker, woken) = oneshot::channel();
        self.table().insert(
            id.clone(),
            PendingRequest {
                kind,
                responses: Vec::new(),
                completed: false,
                sent: false,
                info: None,
                started_at: Instant::now(),
                waker: Some(waker),
            },
        );
        debug!(request_id = %id, ?kind, "request opened");

        PendingHandle {
            id,
            kind,
            correlator: Arc::clone(self),
            woken,
        }
    }

    /// Collect one reply item; `false` when the id is not pending
    pub fn push_response(&self, id: &RequestId, reply: ApiReply) -> bool {
        self.update(id, |request| {
            request.responses.push(reply);
        })
    }

    /// Mark a command request finished; `false` unless `id` is a pending command
    pub fn complete(&self, id: &RequestId) -> bool {
        self.settle(id, RequestKind::Command, |request| request.completed = true)
    }

    /// Mark a chat request delivered; `false` unless `id` is a pending chat send
    pub fn mark_sent(&self, id: &RequestId) -> bool {
        self.settle(id, RequestKind::ChatSend, |request| request.sent = true)
    }

    /// Attach an info payload; `false` unless `id` is a pending info request
    pub fn deliver_info(&self, id: &RequestId, info: Value) -> bool {
        self.settle(id, RequestKind::Info, |request| request.info = Some(info))
    }

    /// Number of requests still waiting
    pub fn outstanding(&self) -> usize {
        self.table().len()
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.table().contains_key(id)
    }

    fn update(&self, id: &RequestId, apply: impl FnOnce(&mut PendingRequest)) -> bool {
        match self.table().get_mut(id) {
            Some(request) => {
                apply(request);
                true
            }
            None => {
                debug!(request_id = %id, "reply for unknown request ignored");
                false
            }
        }
    }

    fn settle(
        &self,
        id: &RequestId,
        kind: RequestKind,
        apply: impl FnOnce(&mut PendingRequest),
    ) -> bool {
        let mut table = self.table();
        let Some(request) = table.get_mut(id) else {
            debug!(request_id = %id, ?kind, "reply for unknown request ignored");
            return false;
        };
        if request.kind != kind {
            debug!(
                request_id = %id,
                expected = ?request.kind,
                got = ?kind,
                "terminal event for a different request kind ignored"
            );
            return false;
        }
        apply(request);
        request.wake();
        true
    }

    fn remove(&self, id: &RequestId) -> Option<PendingRequest> {
        self.table().remove(id)
    }

    fn next_id(&self) -> RequestId {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        let random = Uuid::new_v4().simple().to_string();
        RequestId(format!("{sequence}-{}", &random[..12]))
    }

    fn table(&self) -> MutexGuard<'_, HashMap<RequestId, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCorrelator")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Waits for one pending request; dropping it discards the entry
pub struct PendingHandle {
    id: RequestId,
    kind: RequestKind,
    correlator: Arc<RequestCorrelator>,
    woken: oneshot::Receiver<()>,
}

impl PendingHandle {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Wait until the request completes or `timeout` elapses
    pub async fn wait(mut self, timeout: Duration) -> Result<CompletedRequest, HubError> {
        let woken = tokio::time::timeout(timeout, &mut self.woken).await;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

        if woken.is_err() {
            warn!(request_id = %self.id, kind = ?self.kind, timeout_ms, "request timed out");
            return Err(HubError::Timeout {
                id: self.id.clone(),
                timeout_ms,
            });
        }

        let request = self
            .correlator
            .remove(&self.id)
            .filter(PendingRequest::is_finished)
            .ok_or_else(|| HubError::Timeout {
                id: self.id.clone(),
                timeout_ms,
            })?;

        Ok(CompletedRequest {
            id: self.id.clone(),
            kind: request.kind,
            responses: request.responses,
            sent: request.sent,
            info: request.info,
            elapsed: request.started_at.elapsed(),
        })
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        if self.correlator.remove(&self.id).is_some() {
            debug!(request_id = %self.id, "pending request discarded");
        }
    }
}

//! SSE session registry and backend frame routing.
//!
//! A response frame is delivered to the session whose request carried the
//! same id; everything else (notifications, server-initiated requests,
//! responses nobody is waiting for) goes to every session.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::codec::Frame;

/// Buffered frames per session; once full, routing waits for the reader.
pub(crate) const SESSION_QUEUE_CAPACITY: usize = 256;

pub(crate) type SessionId = String;

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<SessionId, mpsc::Sender<Frame>>,
    /// Request id → sessions that sent a request with that id, oldest first.
    pending: HashMap<String, VecDeque<SessionId>>,
}

#[derive(Debug)]
pub(crate) struct SessionRegistry {
    inner: Mutex<Inner>,
    closed: CancellationToken,
}

/// Canonical key for a JSON-RPC id, so `1` and `"1"` stay distinct.
fn id_key(id: &Value) -> Option<String> {
    match id {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Ids of the requests carried by a client frame (batches included).
fn request_ids(value: &Value) -> Vec<String> {
    match value {
        Value::Object(map) if map.contains_key("method") => {
            map.get("id").and_then(id_key).into_iter().collect()
        }
        Value::Array(items) => items.iter().flat_map(request_ids).collect(),
        _ => Vec::new(),
    }
}

/// Id a backend frame answers, if it is a response.
fn response_id(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) if !map.contains_key("method") => map.get("id").and_then(id_key),
        Value::Array(items) => items.iter().find_map(response_id),
        _ => None,
    }
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            closed: CancellationToken::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned map is still structurally valid.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a new session; `None` once the registry is closed.
    pub(crate) fn open(&self) -> Option<(SessionId, mpsc::Receiver<Frame>)> {
        if self.is_closed() {
            return None;
        }
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        self.lock().sessions.insert(id.clone(), tx);
        debug!(session = %id, "SSE session opened");
        Some((id, rx))
    }

    pub(crate) fn remove(&self, id: &str) {
        let mut inner = self.lock();
        if inner.sessions.remove(id).is_some() {
            inner.pending.retain(|_, waiting| {
                waiting.retain(|session| session != id);
                !waiting.is_empty()
            });
            debug!(session = %id, "SSE session closed");
        }
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.lock().sessions.contains_key(id)
    }

    /// Remember which session is waiting for the ids in `frame`.
    pub(crate) fn track_requests(&self, session: &str, frame: &Frame) {
        let ids = request_ids(frame.value());
        if ids.is_empty() {
            return;
        }
        let mut inner = self.lock();
        for id in ids {
            inner
                .pending
                .entry(id)
                .or_default()
                .push_back(session.to_string());
        }
    }

    /// Deliver a backend frame to its session, or to all sessions.
    ///
    /// Waits while a target session's queue is full, so a slow reader slows
    /// the backend down instead of losing frames. Gives up once the registry
    /// is closed.
    pub(crate) async fn route(&self, frame: Frame) {
        let targets = self.targets(&frame);
        for (session, tx) in targets {
            let sent = tokio::select! {
                () = self.closed.cancelled() => return,
                sent = tx.send(frame.clone()) => sent,
            };
            if sent.is_err() {
                self.remove(&session);
            }
        }
    }

    /// Senders the frame goes to, taken out of the lock.
    fn targets(&self, frame: &Frame) -> Vec<(SessionId, mpsc::Sender<Frame>)> {
        let mut inner = self.lock();

        let target = response_id(frame.value()).and_then(|id| {
            let waiting = inner.pending.get_mut(&id)?;
            let session = waiting.pop_front();
            if waiting.is_empty() {
                inner.pending.remove(&id);
            }
            session
        });

        match target {
            Some(session) => {
                trace!(session = %session, "Routing response");
                inner
                    .sessions
                    .get(&session)
                    .map(|tx| (session.clone(), tx.clone()))
                    .into_iter()
                    .collect()
            }
            None => {
                trace!(sessions = inner.sessions.len(), "Broadcasting frame");
                inner
                    .sessions
                    .iter()
                    .map(|(session, tx)| (session.clone(), tx.clone()))
                    .collect()
            }
        }
    }

    /// Close every session. Queued frames are still delivered; afterwards
    /// each session stream ends. New sessions are refused.
    pub(crate) fn close_all(&self) {
        let mut inner = self.lock();
        let count = inner.sessions.len();
        inner.sessions.clear();
        inner.pending.clear();
        self.closed.cancel();
        debug!(count, "Closed all SSE sessions");
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`close_all`](Self::close_all) has run.
    pub(crate) async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

/// Removes its session from the registry when dropped.
pub(crate) struct SessionGuard {
    registry: std::sync::Arc<SessionRegistry>,
    id: SessionId,
}

impl SessionGuard {
    pub(crate) const fn new(registry: std::sync::Arc<SessionRegistry>, id: SessionId) -> Self {
        Self { registry, id }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

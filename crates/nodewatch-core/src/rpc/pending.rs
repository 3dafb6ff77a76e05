use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::warn;

use crate::error::RpcError;

pub(crate) type CallResult = Result<serde_json::Value, RpcError>;

struct PendingCall {
    method: String,
    /// Set once the request frame has been written to the socket.
    sent: bool,
    responder: oneshot::Sender<CallResult>,
}

/// Calls awaiting a response, keyed by correlation id.
///
/// Callers insert and remove (on timeout); the connection task marks frames
/// as sent and resolves responses. The lock is never held across an await.
#[derive(Default)]
pub(crate) struct PendingCalls {
    calls: Mutex<HashMap<u64, PendingCall>>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a call. Returns `None` if `id` is already in flight.
    pub(crate) fn insert(&self, id: u64, method: &str) -> Option<oneshot::Receiver<CallResult>> {
        let mut calls = self.lock();
        if calls.contains_key(&id) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        calls.insert(
            id,
            PendingCall {
                method: method.to_owned(),
                sent: false,
                responder: tx,
            },
        );
        Some(rx)
    }

    /// Mark a call as written. Returns `false` when the call is gone
    /// (timed out or flushed) and the frame should not be sent.
    pub(crate) fn mark_sent(&self, id: u64) -> bool {
        match self.lock().get_mut(&id) {
            Some(call) => {
                call.sent = true;
                true
            }
            None => false,
        }
    }

    /// Deliver a response. Unknown ids are stale or duplicate and dropped.
    pub(crate) fn resolve(&self, id: u64, result: CallResult) -> bool {
        let Some(call) = self.lock().remove(&id) else {
            warn!(rpc.id = id, "discarding response for unknown request id");
            return false;
        };
        // The caller may have given up between removal and send.
        let _ = call.responder.send(result);
        true
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Fail every call whose frame already reached the socket. Unsent calls
    /// stay queued for the next connection.
    pub(crate) fn fail_sent(&self, make_err: impl Fn() -> RpcError) -> usize {
        let mut calls = self.lock();
        let sent: Vec<u64> = calls
            .iter()
            .filter(|(_, call)| call.sent)
            .map(|(id, _)| *id)
            .collect();
        for id in &sent {
            if let Some(call) = calls.remove(id) {
                let _ = call.responder.send(Err(make_err()));
            }
        }
        sent.len()
    }

    /// Fail every outstanding call.
    pub(crate) fn fail_all(&self, make_err: impl Fn() -> RpcError) -> usize {
        let drained: Vec<(u64, PendingCall)> = self.lock().drain().collect();
        let count = drained.len();
        for (id, call) in drained {
            tracing::debug!(rpc.id = id, rpc.method = %call.method, "failing pending call");
            let _ = call.responder.send(Err(make_err()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingCall>> {
        // Every mutation is a single insert or remove.
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

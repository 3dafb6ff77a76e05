use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{CoreError, RpcError};

use super::pending::PendingCalls;
use super::protocol::JsonRpcRequest;

/// A serialized request waiting for the connection task to write it.
#[derive(Debug)]
pub(crate) struct OutboundFrame {
    pub(crate) id: u64,
    pub(crate) method: String,
    pub(crate) text: String,
}

/// Turns fire-and-forget socket writes into call/result semantics.
///
/// The pending entry is registered before the frame is queued, so a
/// response can never arrive for a call the table does not know about.
pub(crate) struct RequestEngine {
    next_id: AtomicU64,
    pending: Arc<PendingCalls>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    default_timeout: Duration,
    shutdown: CancellationToken,
}

impl RequestEngine {
    pub(crate) fn new(
        pending: Arc<PendingCalls>,
        outbound: mpsc::UnboundedSender<OutboundFrame>,
        default_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending,
            outbound,
            default_timeout,
            shutdown,
        }
    }

    pub(crate) async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError> {
        self.call_with_timeout(method, params, self.default_timeout)
            .await
    }

    pub(crate) async fn call_with_timeout(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, CoreError> {
        if self.shutdown.is_cancelled() {
            return Err(RpcError::Shutdown.into());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = serde_json::to_string(&JsonRpcRequest::new(id, method, &params))
            .map_err(RpcError::Encode)?;

        let response = self.pending.insert(id, method).ok_or_else(|| {
            RpcError::InvalidResponse(format!("request id {id} is already in flight"))
        })?;

        // Shutdown may have flushed the table between the first check and
        // the insert; re-check so this call cannot be missed by the flush.
        if self.shutdown.is_cancelled() {
            self.pending.remove(id);
            return Err(RpcError::Shutdown.into());
        }

        debug!(
            rpc.id = id,
            rpc.method = method,
            rpc.params = params.len(),
            "rpc call"
        );
        let frame = OutboundFrame {
            id,
            method: method.to_owned(),
            text,
        };
        if self.outbound.send(frame).is_err() {
            self.pending.remove(id);
            return Err(RpcError::Shutdown.into());
        }

        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(result)) => {
                debug!(rpc.id = id, rpc.method = method, ok = result.is_ok(), "rpc response");
                result.map_err(Into::into)
            }
            // Responder dropped without an answer: the table was torn down.
            Ok(Err(_)) => Err(RpcError::Shutdown.into()),
            Err(_) => {
                self.pending.remove(id);
                debug!(rpc.id = id, rpc.method = method, ?timeout, "rpc call timed out");
                Err(RpcError::Timeout {
                    method: method.to_owned(),
                    id,
                }
                .into())
            }
        }
    }

    pub(crate) fn pending(&self) -> &Arc<PendingCalls> {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(timeout: Duration) -> (RequestEngine, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = RequestEngine::new(
            Arc::new(PendingCalls::new()),
            tx,
            timeout,
            CancellationToken::new(),
        );
        (engine, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn call_times_out_and_clears_pending_table() {
        let (engine, mut outbound) = engine(Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        let err = engine
            .call("listaccounts", Vec::new())
            .await
            .expect_err("no response must time out");

        assert!(matches!(
            err,
            CoreError::Rpc(RpcError::Timeout { ref method, .. }) if method == "listaccounts"
        ));
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(engine.pending().is_empty());

        let frame = outbound.recv().await.expect("frame was queued");
        assert_eq!(frame.method, "listaccounts");
    }

    #[tokio::test]
    async fn call_resolves_with_matching_response() {
        let (engine, mut outbound) = engine(Duration::from_secs(5));
        let pending = Arc::clone(engine.pending());

        let responder = tokio::spawn(async move {
            let frame = outbound.recv().await.expect("frame was queued");
            let request: serde_json::Value =
                serde_json::from_str(&frame.text).expect("frame is JSON");
            assert_eq!(request["jsonrpc"], "1.0");
            assert!(pending.mark_sent(frame.id));
            pending.resolve(frame.id, Ok(serde_json::json!(321)));
        });

        let result = engine
            .call("getblockcount", Vec::new())
            .await
            .expect("must resolve");
        assert_eq!(result, serde_json::json!(321));
        responder.await.expect("responder task");
        assert!(engine.pending().is_empty());
    }

    #[tokio::test]
    async fn node_error_surfaces_as_rejection() {
        let (engine, mut outbound) = engine(Duration::from_secs(5));
        let pending = Arc::clone(engine.pending());

        tokio::spawn(async move {
            let frame = outbound.recv().await.expect("frame was queued");
            pending.resolve(
                frame.id,
                Err(RpcError::NodeRejected {
                    code: -32601,
                    message: "Method not found".into(),
                }),
            );
        });

        let err = engine
            .call("listaccounts", Vec::new())
            .await
            .expect_err("must fail");
        assert!(matches!(
            err,
            CoreError::Rpc(RpcError::NodeRejected { code: -32601, .. })
        ));
    }

    #[tokio::test]
    async fn call_after_shutdown_fails_fast() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let engine = RequestEngine::new(
            Arc::new(PendingCalls::new()),
            tx,
            Duration::from_secs(5),
            token.clone(),
        );
        token.cancel();

        let err = engine
            .call("getblockcount", Vec::new())
            .await
            .expect_err("must fail");
        assert!(matches!(err, CoreError::Rpc(RpcError::Shutdown)));
        assert!(engine.pending().is_empty());
    }

    #[tokio::test]
    async fn ids_are_unique_across_calls() {
        let (engine, mut outbound) = engine(Duration::from_millis(10));
        let _ = engine.call("a", Vec::new()).await;
        let _ = engine.call("b", Vec::new()).await;

        let first = outbound.recv().await.expect("first frame");
        let second = outbound.recv().await.expect("second frame");
        assert_ne!(first.id, second.id);
    }
}

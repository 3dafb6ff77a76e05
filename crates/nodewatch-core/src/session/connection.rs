use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::RpcError;
use crate::rpc::engine::OutboundFrame;
use crate::rpc::protocol::{classify_frame, Incoming};
use crate::transport::{self, WsConnection};

use super::{Inner, SessionState, Shared};

enum Exit {
    Shutdown,
    Disconnected(String),
}

/// Owns the websocket for the lifetime of the session.
///
/// Reads frames, resolves responses, enqueues notifications, and writes
/// queued requests. Frames queued while disconnected stay in `outbound`
/// and are written after the next successful reconnect.
pub(super) async fn run(
    mut connection: WsConnection,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    shared: Arc<Shared>,
    config: ConnectionConfig,
    client: Weak<Inner>,
) {
    loop {
        match pump(&mut connection, &mut outbound, &shared).await {
            Exit::Shutdown => {
                debug!("closing websocket");
                connection.writer.close().await;
                return;
            }
            Exit::Disconnected(reason) => {
                warn!(%reason, "lost connection to node");
                shared.transition(SessionState::Disconnected);
                let lost = shared.pending.fail_sent(|| RpcError::ConnectionLost);
                if lost > 0 {
                    warn!(calls = lost, "failed in-flight calls after disconnect");
                }

                match transport::reconnect(&config, &shared.shutdown).await {
                    Some(next) => {
                        connection = next;
                        shared.transition(SessionState::Connected);
                        info!("reconnected to node");
                        if let Some(inner) = client.upgrade() {
                            tokio::spawn(super::replay_subscriptions(inner));
                        }
                    }
                    None if shared.shutdown.is_cancelled() => return,
                    None => {
                        terminate(&shared).await;
                        return;
                    }
                }
            }
        }
    }
}

async fn pump(
    connection: &mut WsConnection,
    outbound: &mut mpsc::UnboundedReceiver<OutboundFrame>,
    shared: &Shared,
) -> Exit {
    loop {
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => return Exit::Shutdown,
            frame = connection.reader.receive() => match frame {
                Some(Ok(text)) => handle_frame(shared, &text),
                Some(Err(e)) => return Exit::Disconnected(e.to_string()),
                None => return Exit::Disconnected("connection closed by node".to_owned()),
            },
            Some(frame) = outbound.recv() => {
                if !shared.pending.mark_sent(frame.id) {
                    debug!(rpc.id = frame.id, rpc.method = %frame.method, "skipping abandoned request");
                    continue;
                }
                trace!(rpc.id = frame.id, rpc.method = %frame.method, "writing request");
                if let Err(e) = connection.writer.send(frame.text).await {
                    return Exit::Disconnected(e.to_string());
                }
            }
        }
    }
}

fn handle_frame(shared: &Shared, text: &str) {
    trace!(frame = %text, "frame received");
    match classify_frame(text) {
        Ok(Incoming::Response { id, result }) => {
            shared.pending.resolve(id, result);
        }
        Ok(Incoming::Notification { method, params }) => {
            shared.dispatcher.dispatch_raw(&method, params);
        }
        Err(e) => warn!(error = %e, "dropping unreadable frame"),
    }
}

/// Reconnect is disabled or exhausted: run the shutdown path from here so
/// `wait_for_shutdown` returns.
async fn terminate(shared: &Shared) {
    if !shared.begin_shutdown() {
        return;
    }
    warn!("connection lost permanently; closing session");
    shared.shutdown.cancel();
    shared.pending.fail_all(|| RpcError::ConnectionLost);
    shared.finish().await;
}

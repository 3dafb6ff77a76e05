//! Websocket session lifecycle.
//!
//! A [`Client`] owns one authenticated websocket to the node plus the
//! task that drives it. Calls are multiplexed over the socket, push
//! notifications are routed to the caller's [`NotificationHandlers`], and
//! the connection is re-established (with subscriptions replayed) when the
//! reconnect policy allows it.

mod commands;
mod connection;
mod subscription;

pub use subscription::Subscription;

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{CoreError, RpcError};
use crate::notify::dispatcher::{self, Dispatcher};
use crate::notify::{Notification, NotificationHandlers};
use crate::rpc::engine::RequestEngine;
use crate::rpc::pending::PendingCalls;
use crate::rpc::{commands as rpc_commands, NodeRpc};
use crate::transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
    Closed,
}

impl SessionState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ShuttingDown => "shutting_down",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// State the connection task needs without holding the client alive.
struct Shared {
    state: watch::Sender<SessionState>,
    shutdown: CancellationToken,
    pending: Arc<PendingCalls>,
    dispatcher: Dispatcher,
}

impl Shared {
    fn new(handlers: Arc<dyn NotificationHandlers>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            state,
            shutdown: CancellationToken::new(),
            pending: Arc::new(PendingCalls::new()),
            dispatcher: Dispatcher::new(handlers),
        }
    }

    /// Move to `next` unless shutdown has already begun.
    fn transition(&self, next: SessionState) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            debug!(from = %state, to = %next, "session state");
            *state = next;
            true
        });
    }

    /// Claim the shutdown path. Only the first caller gets `true`.
    fn begin_shutdown(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = SessionState::ShuttingDown;
            true
        })
    }

    /// Drain handler queues and mark the session closed.
    async fn finish(&self) {
        self.dispatcher.close().await;
        self.state.send_replace(SessionState::Closed);
        info!("session closed");
    }
}

struct Inner {
    config: ConnectionConfig,
    engine: RequestEngine,
    shared: Arc<Shared>,
    subscription: Mutex<Subscription>,
    connection_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Last handle gone without an explicit shutdown: stop the socket task.
        self.shared.shutdown.cancel();
    }
}

/// Handle to a live websocket session. Cheap to clone; all clones share
/// the same connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.inner.config.host())
            .field("state", &self.state())
            .finish()
    }
}

impl Client {
    /// Connect to the node and start the session.
    ///
    /// Fails with a connect error if the handshake is rejected. Handlers
    /// receive a `ClientConnected` notification once the session is up.
    pub async fn start(
        config: ConnectionConfig,
        handlers: Arc<dyn NotificationHandlers>,
    ) -> Result<Self, CoreError> {
        if config.http_post_mode() {
            return Err(CoreError::InvalidConfig(
                "HTTP POST mode has no websocket session; use HttpPostClient".to_owned(),
            ));
        }

        let shared = Arc::new(Shared::new(handlers));
        shared.transition(SessionState::Connecting);
        let connection = transport::connect(&config).await?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let engine = RequestEngine::new(
            Arc::clone(&shared.pending),
            outbound_tx,
            config.request_timeout(),
            shared.shutdown.clone(),
        );

        let inner = Arc::new(Inner {
            config: config.clone(),
            engine,
            shared: Arc::clone(&shared),
            subscription: Mutex::new(Subscription::default()),
            connection_task: Mutex::new(None),
        });

        shared.transition(SessionState::Connected);
        let task = tokio::spawn(connection::run(
            connection,
            outbound_rx,
            Arc::clone(&shared),
            config,
            Arc::downgrade(&inner),
        ));
        *inner
            .connection_task
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(task);

        shared.dispatcher.dispatch(Notification::ClientConnected);
        info!(host = inner.config.host(), "client started");
        Ok(Self { inner })
    }

    pub fn state(&self) -> SessionState {
        *self.inner.shared.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.shared.state.subscribe()
    }

    /// Snapshot of the subscriptions that will be replayed on reconnect.
    pub fn subscription(&self) -> Subscription {
        self.inner
            .subscription
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Number of calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.shared.pending.len()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Issue a call with an explicit deadline instead of the configured
    /// default.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, CoreError> {
        self.inner
            .engine
            .call_with_timeout(method, params, timeout)
            .await
    }

    /// Stop the session.
    ///
    /// Pending calls fail with `Shutdown`, the socket is closed, and queued
    /// notifications finish delivering before the state becomes `Closed`.
    /// Safe to call more than once and from several clones.
    ///
    /// Called from inside a notification handler, this only starts the
    /// shutdown and returns; the session closes once the handler returns.
    pub async fn shutdown(&self) {
        if dispatcher::in_handler() {
            let client = self.clone();
            tokio::spawn(async move { client.run_shutdown().await });
            return;
        }
        self.run_shutdown().await;
    }

    async fn run_shutdown(&self) {
        let shared = &self.inner.shared;
        if !shared.begin_shutdown() {
            self.wait_for_shutdown().await;
            return;
        }

        info!("shutting down client");
        shared.shutdown.cancel();
        let failed = shared.pending.fail_all(|| RpcError::Shutdown);
        if failed > 0 {
            debug!(calls = failed, "failed pending calls on shutdown");
        }

        let task = self
            .inner
            .connection_task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "connection task failed");
            }
        }

        shared.finish().await;
    }

    /// Resolve once the session reaches `Closed`, whether through
    /// [`Client::shutdown`] or a terminal disconnect.
    ///
    /// Never resolves when awaited from inside a notification handler,
    /// since closing waits for that handler to return.
    pub async fn wait_for_shutdown(&self) {
        let mut state = self.subscribe_state();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }
}

#[async_trait]
impl NodeRpc for Client {
    async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError> {
        self.inner.engine.call(method, params).await
    }
}

/// Re-issue the recorded subscriptions on a fresh connection, then tell the
/// handlers the session is usable again.
async fn replay_subscriptions(inner: Arc<Inner>) {
    let subscription = inner
        .subscription
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .clone();

    if subscription.blocks {
        replay(&inner, rpc_commands::NOTIFY_BLOCKS, Vec::new()).await;
    }
    if let Some(verbose) = subscription.new_transactions {
        replay(
            &inner,
            rpc_commands::NOTIFY_NEW_TRANSACTIONS,
            vec![serde_json::json!(verbose)],
        )
        .await;
    }
    if let Some(filter) = subscription.filter.as_ref().filter(|f| !f.is_empty()) {
        replay(&inner, rpc_commands::LOAD_TX_FILTER, filter.to_params(true)).await;
    }

    inner.shared.dispatcher.dispatch(Notification::ClientConnected);
}

async fn replay(inner: &Inner, method: &str, params: Vec<serde_json::Value>) {
    match inner.engine.call(method, params).await {
        Ok(_) => debug!(rpc.method = method, "subscription replayed"),
        Err(e) => warn!(rpc.method = method, error = %e, "failed to replay subscription"),
    }
}

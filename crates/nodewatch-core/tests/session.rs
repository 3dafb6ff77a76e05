//! Session behaviour against an in-process fake btcd websocket server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::blockdata::constants::genesis_block;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::{Network, OutPoint, Txid};
use futures::{SinkExt, StreamExt};
use nodewatch_core::rpc::commands;
use nodewatch_core::{
    BlockStamp, Client, ConnectError, ConnectionConfig, CoreError, NodeRpc, NotificationHandlers,
    ReconnectPolicy, RpcError, SessionState, TxFilter,
};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("nodewatch_core=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

// ==============================================================================
// Fake node
// ==============================================================================

/// Decides the reply body for a request. `None` leaves the call unanswered.
type Reply = Arc<dyn Fn(&str, &Value) -> Option<Value> + Send + Sync>;

#[derive(Debug, Clone)]
struct SeenRequest {
    connection: usize,
    method: String,
    params: Value,
}

struct FakeNode {
    addr: SocketAddr,
    requests: mpsc::UnboundedReceiver<SeenRequest>,
    connections: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>>,
}

fn ok(result: Value) -> Option<Value> {
    Some(json!({ "result": result, "error": null }))
}

fn responder(f: impl Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static) -> Reply {
    Arc::new(f)
}

/// Answer every request with a null result.
fn accept_all() -> Reply {
    responder(|_, _| ok(Value::Null))
}

impl FakeNode {
    async fn start(reply: Reply) -> Self {
        Self::spawn(reply, None).await
    }

    async fn with_credentials(reply: Reply, user: &str, pass: &str) -> Self {
        use base64::Engine as _;
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        Self::spawn(reply, Some(format!("Basic {token}"))).await
    }

    async fn spawn(reply: Reply, expected_auth: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let connections = Arc::new(Mutex::new(Vec::new()));

        let registry = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let expected = expected_auth.clone();
                let callback =
                    move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        let Some(expected) = expected else {
                            return Ok(resp);
                        };
                        let presented = req
                            .headers()
                            .get(header::AUTHORIZATION)
                            .and_then(|v| v.to_str().ok());
                        if presented == Some(expected.as_str()) {
                            Ok(resp)
                        } else {
                            let mut rejection = ErrorResponse::new(Some("unauthorized".into()));
                            *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                            Err(rejection)
                        }
                    };
                let Ok(ws) = accept_hdr_async(tcp, callback).await else {
                    continue;
                };

                let (push_tx, push_rx) = mpsc::unbounded_channel();
                let index = {
                    let mut conns = registry.lock().expect("registry lock");
                    conns.push(push_tx);
                    conns.len() - 1
                };
                tokio::spawn(serve(
                    index,
                    ws,
                    Arc::clone(&reply),
                    requests_tx.clone(),
                    push_rx,
                ));
            }
        });

        Self {
            addr,
            requests,
            connections,
        }
    }

    fn config(&self) -> ConnectionConfig {
        self.config_builder().build().expect("valid config")
    }

    fn config_builder(&self) -> nodewatch_core::config::ConnectionConfigBuilder {
        ConnectionConfig::builder(self.addr.to_string())
            .disable_tls(true)
            .credentials("user", "pass")
            .request_timeout(Duration::from_secs(5))
    }

    fn connection_count(&self) -> usize {
        self.connections.lock().expect("registry lock").len()
    }

    async fn wait_for_connections(&self, n: usize) {
        eventually("node connections", || self.connection_count() >= n).await;
    }

    /// Send a frame on the most recent connection.
    fn push_frame(&self, frame: Value) {
        let conns = self.connections.lock().expect("registry lock");
        let latest = conns.last().expect("no connection to push to");
        latest
            .send(Message::Text(frame.to_string()))
            .expect("connection task alive");
    }

    fn notify(&self, method: &str, params: Value) {
        self.push_frame(json!({ "jsonrpc": "1.0", "id": null, "method": method, "params": params }));
    }

    /// Close the most recent connection from the node side.
    fn drop_latest_connection(&self) {
        let conns = self.connections.lock().expect("registry lock");
        let latest = conns.last().expect("no connection to close");
        let _ = latest.send(Message::Close(None));
    }

    async fn next_request(&mut self) -> SeenRequest {
        tokio::time::timeout(Duration::from_secs(5), self.requests.recv())
            .await
            .expect("request within deadline")
            .expect("request channel open")
    }
}

async fn serve(
    connection: usize,
    ws: WebSocketStream<TcpStream>,
    reply: Reply,
    requests: mpsc::UnboundedSender<SeenRequest>,
    mut push: mpsc::UnboundedReceiver<Message>,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let request: Value = serde_json::from_str(&text).expect("client sends JSON");
                    let method = request["method"].as_str().unwrap_or_default().to_owned();
                    let params = request["params"].clone();
                    let answer = reply(&method, &params);
                    let _ = requests.send(SeenRequest { connection, method, params });
                    if let Some(mut body) = answer {
                        body["id"] = request["id"].clone();
                        if sink.send(Message::Text(body.to_string())).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
            outgoing = push.recv() => match outgoing {
                Some(Message::Close(_)) | None => {
                    let _ = sink.close().await;
                    return;
                }
                Some(message) => {
                    if sink.send(message).await.is_err() {
                        return;
                    }
                }
            },
        }
    }
}

// ==============================================================================
// Handlers
// ==============================================================================

#[derive(Default)]
struct Recorder {
    connected: AtomicUsize,
    blocks: Mutex<Vec<u32>>,
}

impl Recorder {
    fn connected(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    fn blocks(&self) -> Vec<u32> {
        self.blocks.lock().expect("blocks lock").clone()
    }
}

/// Only block and connect callbacks are overridden.
#[async_trait]
impl NotificationHandlers for Recorder {
    async fn on_client_connected(&self) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_block_connected(&self, block: &BlockStamp) {
        self.blocks.lock().expect("blocks lock").push(block.height.0);
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn block_params(height: u32) -> Value {
    let hash = genesis_block(Network::Regtest).block_hash();
    json!([hash.to_string(), height, 1_700_000_000])
}

fn outpoint_filter(byte: u8) -> TxFilter {
    let txid = Txid::from_byte_array([byte; 32]);
    TxFilter::new(Vec::new(), vec![OutPoint::new(txid, 1)])
}

// ==============================================================================
// Tests
// ==============================================================================

#[tokio::test]
async fn unregistered_notification_kind_is_ignored() {
    init_tracing();
    let node = FakeNode::start(accept_all()).await;
    let recorder = Arc::new(Recorder::default());
    let client = Client::start(node.config(), recorder.clone())
        .await
        .expect("client must start");
    node.wait_for_connections(1).await;

    let coinbase = &genesis_block(Network::Regtest).txdata[0];
    node.notify("redeemingtx", json!([serialize_hex(coinbase)]));
    node.notify("blockconnected", block_params(5));

    eventually("block notification", || recorder.blocks() == vec![5]).await;
    assert_eq!(client.state(), SessionState::Connected);
    client.shutdown().await;
}

#[tokio::test]
async fn block_notifications_keep_arrival_order() {
    init_tracing();
    let node = FakeNode::start(accept_all()).await;
    let recorder = Arc::new(Recorder::default());
    let client = Client::start(node.config(), recorder.clone())
        .await
        .expect("client must start");
    node.wait_for_connections(1).await;

    for height in 0..25 {
        node.notify("blockconnected", block_params(height));
    }
    eventually("all blocks", || recorder.blocks().len() == 25).await;
    assert_eq!(recorder.blocks(), (0..25).collect::<Vec<_>>());
    client.shutdown().await;
}

#[tokio::test]
async fn client_connected_is_delivered_after_start() {
    init_tracing();
    let node = FakeNode::start(accept_all()).await;
    let recorder = Arc::new(Recorder::default());
    let client = Client::start(node.config(), recorder.clone())
        .await
        .expect("client must start");

    eventually("client connected", || recorder.connected() == 1).await;
    client.shutdown().await;
}

#[tokio::test]
async fn calls_resolve_with_matching_result() {
    init_tracing();
    let reply = responder(|method, _| match method {
        commands::GET_BLOCK_COUNT => ok(json!(144)),
        commands::SESSION => ok(json!({ "sessionid": 42 })),
        _ => ok(Value::Null),
    });
    let node = FakeNode::start(reply).await;
    let client = Client::start(node.config(), Arc::new(Recorder::default()))
        .await
        .expect("client must start");

    let height = client.get_block_count().await.expect("block count");
    assert_eq!(height.0, 144);
    assert_eq!(client.session_id().await.expect("session id"), 42);
    assert_eq!(client.pending_calls(), 0);
    client.shutdown().await;
}

#[tokio::test]
async fn node_error_is_reported_to_caller() {
    init_tracing();
    let reply = responder(|_, _| {
        Some(json!({ "result": null, "error": { "code": -32601, "message": "Method not found" } }))
    });
    let node = FakeNode::start(reply).await;
    let client = Client::start(node.config(), Arc::new(Recorder::default()))
        .await
        .expect("client must start");

    let err = client.list_accounts().await.expect_err("node rejects");
    assert!(matches!(
        err,
        CoreError::Rpc(RpcError::NodeRejected { code: -32601, .. })
    ));
    client.shutdown().await;
}

#[tokio::test]
async fn unanswered_call_times_out_and_leaves_no_pending_entry() {
    init_tracing();
    let reply = responder(|method, _| match method {
        commands::LIST_ACCOUNTS => None,
        _ => ok(Value::Null),
    });
    let node = FakeNode::start(reply).await;
    let config = node
        .config_builder()
        .request_timeout(Duration::from_secs(2))
        .build()
        .expect("valid config");
    let client = Client::start(config, Arc::new(Recorder::default()))
        .await
        .expect("client must start");

    let started = Instant::now();
    let err = client.list_accounts().await.expect_err("must time out");
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(matches!(
        err,
        CoreError::Rpc(RpcError::Timeout { ref method, .. }) if method == commands::LIST_ACCOUNTS
    ));
    assert_eq!(client.pending_calls(), 0);
    assert_eq!(client.state(), SessionState::Connected);
    client.shutdown().await;
}

#[tokio::test]
async fn unknown_response_id_is_discarded() {
    init_tracing();
    let reply = responder(|method, _| match method {
        commands::GET_BLOCK_COUNT => ok(json!(7)),
        _ => ok(Value::Null),
    });
    let node = FakeNode::start(reply).await;
    let client = Client::start(node.config(), Arc::new(Recorder::default()))
        .await
        .expect("client must start");
    node.wait_for_connections(1).await;

    node.push_frame(json!({ "id": 9999, "result": 1, "error": null }));
    let height = client.get_block_count().await.expect("session still usable");
    assert_eq!(height.0, 7);
    client.shutdown().await;
}

#[tokio::test]
async fn shutdown_fails_every_pending_call() {
    init_tracing();
    let node = FakeNode::start(responder(|_, _| None)).await;
    let client = Client::start(node.config(), Arc::new(Recorder::default()))
        .await
        .expect("client must start");

    let calls: Vec<_> = (0..3)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.get_block_count().await })
        })
        .collect();
    eventually("three pending calls", || client.pending_calls() == 3).await;

    client.shutdown().await;
    assert_eq!(client.state(), SessionState::Closed);
    assert_eq!(client.pending_calls(), 0);

    for call in calls {
        let err = call
            .await
            .expect("call task")
            .expect_err("shutdown must fail the call");
        assert!(matches!(err, CoreError::Rpc(RpcError::Shutdown)));
    }

    let err = client
        .get_block_count()
        .await
        .expect_err("calls after shutdown fail");
    assert!(matches!(err, CoreError::Rpc(RpcError::Shutdown)));
}

#[tokio::test]
async fn shutdown_twice_is_harmless() {
    init_tracing();
    let node = FakeNode::start(accept_all()).await;
    let client = Client::start(node.config(), Arc::new(Recorder::default()))
        .await
        .expect("client must start");

    let other = client.clone();
    tokio::join!(client.shutdown(), other.shutdown());
    client.shutdown().await;
    client.wait_for_shutdown().await;
    assert_eq!(client.state(), SessionState::Closed);
}

#[tokio::test]
async fn reloading_filter_replaces_previous_one() {
    init_tracing();
    let mut node = FakeNode::start(accept_all()).await;
    let client = Client::start(node.config(), Arc::new(Recorder::default()))
        .await
        .expect("client must start");

    client
        .load_tx_filter(outpoint_filter(1))
        .await
        .expect("first filter");
    client
        .load_tx_filter(outpoint_filter(2))
        .await
        .expect("second filter");

    for _ in 0..2 {
        let request = node.next_request().await;
        assert_eq!(request.method, commands::LOAD_TX_FILTER);
        assert_eq!(request.params[0], json!(true));
    }
    assert_eq!(client.subscription().filter, Some(outpoint_filter(2)));

    client
        .extend_tx_filter(outpoint_filter(3))
        .await
        .expect("extend filter");
    let request = node.next_request().await;
    assert_eq!(request.params[0], json!(false));
    let filter = client.subscription().filter.expect("filter recorded");
    assert_eq!(filter.outpoints.len(), 2);
    client.shutdown().await;
}

#[tokio::test]
async fn rejected_subscription_is_not_recorded() {
    init_tracing();
    let reply = responder(|_, _| {
        Some(json!({ "result": null, "error": { "code": -1, "message": "nope" } }))
    });
    let node = FakeNode::start(reply).await;
    let client = Client::start(node.config(), Arc::new(Recorder::default()))
        .await
        .expect("client must start");

    client.notify_blocks().await.expect_err("node rejects");
    assert!(client.subscription().is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn reconnect_replays_subscriptions() {
    init_tracing();
    let mut node = FakeNode::start(accept_all()).await;
    let config = node
        .config_builder()
        .reconnect(ReconnectPolicy {
            enabled: true,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            max_attempts: Some(20),
        })
        .build()
        .expect("valid config");
    let recorder = Arc::new(Recorder::default());
    let client = Client::start(config, recorder.clone())
        .await
        .expect("client must start");

    client.notify_blocks().await.expect("notifyblocks");
    client
        .load_tx_filter(outpoint_filter(9))
        .await
        .expect("loadtxfilter");
    client
        .extend_tx_filter(outpoint_filter(10))
        .await
        .expect("extend filter");
    assert_eq!(node.next_request().await.method, commands::NOTIFY_BLOCKS);
    assert_eq!(node.next_request().await.method, commands::LOAD_TX_FILTER);
    let extended = node.next_request().await;
    assert_eq!(extended.method, commands::LOAD_TX_FILTER);
    assert_eq!(extended.params[0], json!(false));

    node.drop_latest_connection();

    let replayed_blocks = node.next_request().await;
    assert_eq!(replayed_blocks.connection, 1);
    assert_eq!(replayed_blocks.method, commands::NOTIFY_BLOCKS);
    let replayed_filter = node.next_request().await;
    assert_eq!(replayed_filter.connection, 1);
    assert_eq!(replayed_filter.method, commands::LOAD_TX_FILTER);
    assert_eq!(replayed_filter.params[0], json!(true));
    let replayed_hashes: Vec<&Value> = replayed_filter.params[2]
        .as_array()
        .expect("outpoint list")
        .iter()
        .map(|op| &op["hash"])
        .collect();
    assert_eq!(
        replayed_hashes,
        vec![
            &json!(Txid::from_byte_array([9; 32]).to_string()),
            &json!(Txid::from_byte_array([10; 32]).to_string()),
        ]
    );

    eventually("second client connected", || recorder.connected() == 2).await;
    assert_eq!(client.state(), SessionState::Connected);

    node.notify("blockconnected", block_params(11));
    eventually("block after reconnect", || recorder.blocks() == vec![11]).await;
    client.shutdown().await;
}

#[derive(Default)]
struct ShutdownOnBlock {
    client: OnceLock<Client>,
    returned: AtomicUsize,
}

#[async_trait]
impl NotificationHandlers for ShutdownOnBlock {
    async fn on_block_connected(&self, _block: &BlockStamp) {
        if let Some(client) = self.client.get() {
            client.shutdown().await;
            self.returned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn shutdown_from_inside_a_handler_completes() {
    init_tracing();
    let node = FakeNode::start(accept_all()).await;
    let handler = Arc::new(ShutdownOnBlock::default());
    let client = Client::start(node.config(), handler.clone())
        .await
        .expect("client must start");
    handler
        .client
        .set(client.clone())
        .expect("client is set once");
    node.wait_for_connections(1).await;

    node.notify("blockconnected", block_params(3));

    tokio::time::timeout(Duration::from_secs(5), client.wait_for_shutdown())
        .await
        .expect("shutdown requested by a handler must finish");
    assert_eq!(client.state(), SessionState::Closed);
    assert_eq!(handler.returned.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disconnect_without_reconnect_closes_session() {
    init_tracing();
    let node = FakeNode::start(responder(|_, _| None)).await;
    let config = node
        .config_builder()
        .reconnect(ReconnectPolicy::disabled())
        .build()
        .expect("valid config");
    let client = Client::start(config, Arc::new(Recorder::default()))
        .await
        .expect("client must start");
    node.wait_for_connections(1).await;

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.get_block_count().await })
    };
    eventually("pending call", || client.pending_calls() == 1).await;

    node.drop_latest_connection();
    tokio::time::timeout(Duration::from_secs(5), client.wait_for_shutdown())
        .await
        .expect("session closes after terminal disconnect");
    assert_eq!(client.state(), SessionState::Closed);

    let err = pending
        .await
        .expect("call task")
        .expect_err("lost connection fails the call");
    assert!(matches!(err, CoreError::Rpc(RpcError::ConnectionLost)));
}

#[tokio::test]
async fn bad_credentials_are_rejected_at_handshake() {
    init_tracing();
    let node = FakeNode::with_credentials(accept_all(), "alice", "secret").await;
    let config = ConnectionConfig::builder(node.addr.to_string())
        .disable_tls(true)
        .credentials("alice", "wrong")
        .build()
        .expect("valid config");

    let err = Client::start(config, Arc::new(Recorder::default()))
        .await
        .expect_err("handshake must fail");
    assert!(matches!(
        err,
        CoreError::Connect(ConnectError::AuthRejected { status: 401 })
    ));
}

#[tokio::test]
async fn good_credentials_are_accepted() {
    init_tracing();
    let node = FakeNode::with_credentials(accept_all(), "alice", "secret").await;
    let config = ConnectionConfig::builder(node.addr.to_string())
        .disable_tls(true)
        .credentials("alice", "secret")
        .build()
        .expect("valid config");

    let client = Client::start(config, Arc::new(Recorder::default()))
        .await
        .expect("client must start");
    client.shutdown().await;
}

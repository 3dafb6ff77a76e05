use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header;
use tracing::{debug, trace};

use crate::config::ConnectionConfig;
use crate::error::{ConnectError, CoreError, RpcError};

use super::commands::requires_websocket;
use super::protocol::{into_result, parse_response_id, JsonRpcRequest, JsonRpcResponse};
use super::NodeRpc;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

// ==============================================================================
// HttpPostClient: request/response only, no notifications
// ==============================================================================

/// JSON-RPC client that POSTs each request to the node over HTTP(S).
///
/// Used when the node is reachable without websockets. Notification and
/// filter commands are refused with [`RpcError::WebsocketsRequired`].
pub struct HttpPostClient {
    client: reqwest::Client,
    url: String,
    auth: Option<(String, String)>,
    limiter: Option<DirectRateLimiter>,
    next_id: AtomicU64,
}

impl HttpPostClient {
    pub fn new(config: &ConnectionConfig) -> Result<Self, CoreError> {
        let url = config.http_url()?.to_string();
        let auth = config
            .auth()
            .map(|(user, pass)| (user.to_owned(), pass.to_owned()));

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(32)
            .tcp_nodelay(true);
        if let Some(pem) = config.certificates() {
            let certs = reqwest::Certificate::from_pem_bundle(pem)
                .map_err(|e| ConnectError::CertInvalid(e.to_string()))?;
            if certs.is_empty() {
                return Err(ConnectError::CertInvalid("no certificates in PEM bundle".into()).into());
            }
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }
        let client = builder
            .build()
            .map_err(|e| CoreError::InvalidConfig(format!("build HTTP client: {e}")))?;

        let limiter = config.requests_per_second().and_then(NonZeroU32::new).map(|limit| {
            RateLimiter::direct(Quota::per_second(limit))
        });

        Ok(Self {
            client,
            url,
            auth,
            limiter,
            next_id: AtomicU64::new(initial_request_id()),
        })
    }

    /// Atomically reserve `count` consecutive request IDs for batch calls.
    fn reserve_request_ids(&self, count: u64) -> u64 {
        self.next_id.fetch_add(count, Ordering::Relaxed)
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn post(&self, body: String) -> Result<String, CoreError> {
        let mut builder = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some((ref user, ref pass)) = self.auth {
            builder = builder.basic_auth(user, Some(pass));
        }

        let response = builder.send().await.map_err(RpcError::Transport)?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ConnectError::AuthRejected {
                status: status.as_u16(),
            }
            .into());
        }
        Ok(response.text().await.map_err(RpcError::Transport)?)
    }

    /// Issue several calls in one HTTP request. Results come back in call
    /// order; the first node error fails the whole batch.
    pub async fn batch(
        &self,
        calls: &[(String, Vec<serde_json::Value>)],
    ) -> Result<Vec<serde_json::Value>, CoreError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        if let Some((method, _)) = calls.iter().find(|(m, _)| requires_websocket(m)) {
            return Err(RpcError::WebsocketsRequired(method.clone()).into());
        }

        self.wait_for_rate_limit().await;
        let start_id = self.reserve_request_ids(calls.len() as u64);
        debug!(
            rpc.batch_start_id = start_id,
            rpc.batch_size = calls.len(),
            "rpc batch call"
        );
        let requests: Vec<JsonRpcRequest<'_>> = calls
            .iter()
            .enumerate()
            .map(|(offset, (method, params))| {
                JsonRpcRequest::new(start_id + offset as u64, method, params)
            })
            .collect();

        let body = self
            .post(serde_json::to_string(&requests).map_err(RpcError::Encode)?)
            .await?;
        trace!(rpc.batch_start_id = start_id, body = %body, "rpc batch response body");

        let decoded: Vec<JsonRpcResponse> = serde_json::from_str(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("decode JSON-RPC batch response: {e}; body={body}"))
        })?;

        let mut by_id: HashMap<u64, JsonRpcResponse> = HashMap::with_capacity(decoded.len());
        for item in decoded {
            let id = parse_response_id(&item.id)?;
            by_id.insert(id, item);
        }

        let mut ordered = Vec::with_capacity(calls.len());
        for id in start_id..(start_id + calls.len() as u64) {
            let item = by_id.remove(&id).ok_or_else(|| {
                RpcError::InvalidResponse(format!("missing JSON-RPC batch item id={id}"))
            })?;
            ordered.push(into_result(item)?);
        }

        Ok(ordered)
    }
}

#[async_trait]
impl NodeRpc for HttpPostClient {
    async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError> {
        if requires_websocket(method) {
            return Err(RpcError::WebsocketsRequired(method.to_owned()).into());
        }

        self.wait_for_rate_limit().await;
        let id = self.reserve_request_ids(1);
        debug!(
            rpc.id = id,
            rpc.method = method,
            rpc.params = params.len(),
            "rpc call"
        );
        let body = serde_json::to_string(&JsonRpcRequest::new(id, method, &params))
            .map_err(RpcError::Encode)?;

        let body = self.post(body).await?;
        debug!(rpc.id = id, rpc.method = method, body_len = body.len(), "rpc response");
        trace!(rpc.id = id, rpc.method = method, body = %body, "rpc response body");

        let decoded: JsonRpcResponse = serde_json::from_str(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("decode JSON-RPC response: {e}; body={body}"))
        })?;
        into_result(decoded)
    }
}

fn initial_request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures while establishing the websocket session with the node.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("node rejected the supplied credentials (HTTP {status})")]
    AuthRejected { status: u16 },

    #[error("invalid TLS certificate material: {0}")]
    CertInvalid(String),

    #[error("node unreachable: {0}")]
    NetworkUnreachable(String),
}

/// Failures scoped to a single JSON-RPC call.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("`{method}` (id {id}) timed out waiting for a response")]
    Timeout { method: String, id: u64 },

    #[error("client is shutting down")]
    Shutdown,

    #[error("connection to the node was lost before a response arrived")]
    ConnectionLost,

    #[error("node rejected request (code {code}): {message}")]
    NodeRejected { code: i64, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("HTTP transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("`{0}` requires a websocket connection")]
    WebsocketsRequired(String),
}

/// A push notification the dispatcher could not decode.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed `{method}` notification: {reason}")]
    MalformedPayload { method: String, reason: String },
}

impl DispatchError {
    pub(crate) fn malformed(method: &str, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            method: method.to_owned(),
            reason: reason.into(),
        }
    }
}

use crate::error::{CoreError, RpcError};

/// btcd speaks JSON-RPC 1.0 framing over both websockets and HTTP POST.
pub(crate) const JSONRPC_VERSION: &str = "1.0";

#[derive(serde::Serialize)]
pub(crate) struct JsonRpcRequest<'a> {
    pub(crate) jsonrpc: &'static str,
    pub(crate) id: u64,
    pub(crate) method: &'a str,
    pub(crate) params: &'a [serde_json::Value],
}

impl<'a> JsonRpcRequest<'a> {
    pub(crate) fn new(id: u64, method: &'a str, params: &'a [serde_json::Value]) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

#[derive(serde::Deserialize)]
pub(crate) struct JsonRpcResponse {
    pub(crate) id: serde_json::Value,
    pub(crate) result: Option<serde_json::Value>,
    pub(crate) error: Option<serde_json::Value>,
}

/// Every frame the node sends, before it is routed.
#[derive(Debug)]
pub(crate) enum Incoming {
    Response {
        id: u64,
        result: Result<serde_json::Value, RpcError>,
    },
    Notification {
        method: String,
        params: Vec<serde_json::Value>,
    },
}

#[derive(serde::Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Classify a text frame. Frames with a null or missing id that name a
/// method are notifications; everything else must be a response.
pub(crate) fn classify_frame(text: &str) -> Result<Incoming, RpcError> {
    let frame: RawFrame = serde_json::from_str(text)
        .map_err(|e| RpcError::InvalidResponse(format!("decode frame: {e}")))?;

    if frame.id.is_null() {
        let method = frame.method.ok_or_else(|| {
            RpcError::InvalidResponse("frame has neither an id nor a method".to_owned())
        })?;
        return Ok(Incoming::Notification {
            method,
            params: frame.params.unwrap_or_default(),
        });
    }

    let id = parse_response_id(&frame.id)?;
    let result = match frame.error.filter(|e| !e.is_null()) {
        Some(err) => Err(parse_jsonrpc_error(err)),
        None => Ok(frame.result.unwrap_or(serde_json::Value::Null)),
    };
    Ok(Incoming::Response { id, result })
}

/// Parse a JSON-RPC error value into a structured `RpcError`.
///
/// Errors of shape `{"code": <int>, "message": <string>}` become
/// `NodeRejected`; anything else falls back to `InvalidResponse`.
pub(crate) fn parse_jsonrpc_error(err: serde_json::Value) -> RpcError {
    #[derive(serde::Deserialize)]
    struct JsonRpcError {
        code: i64,
        message: String,
    }

    match serde_json::from_value::<JsonRpcError>(err.clone()) {
        Ok(parsed) => RpcError::NodeRejected {
            code: parsed.code,
            message: parsed.message,
        },
        Err(_) => RpcError::InvalidResponse(format!("non-standard JSON-RPC error: {err}")),
    }
}

pub(crate) fn parse_response_id(id: &serde_json::Value) -> Result<u64, RpcError> {
    if let Some(n) = id.as_u64() {
        return Ok(n);
    }

    if let Some(s) = id.as_str() {
        return s
            .parse::<u64>()
            .map_err(|e| RpcError::InvalidResponse(format!("invalid response id string: {e}")));
    }

    Err(RpcError::InvalidResponse(format!("invalid response id: {id}")))
}

/// Unwrap a decoded HTTP POST response body.
pub(crate) fn into_result(response: JsonRpcResponse) -> Result<serde_json::Value, CoreError> {
    if let Some(err) = response.error.filter(|e| !e.is_null()) {
        return Err(parse_jsonrpc_error(err).into());
    }
    Ok(response.result.unwrap_or(serde_json::Value::Null))
}

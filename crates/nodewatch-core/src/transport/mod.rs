//! Websocket transport to the node.
//!
//! [`connect`] performs the authenticated handshake and splits the socket
//! into a [`WsWriter`] and a [`WsReader`] so the connection task can select
//! over both halves. [`reconnect`] retries with the configured backoff.

mod tls;

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{ConnectError, CoreError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) struct WsConnection {
    pub(crate) writer: WsWriter,
    pub(crate) reader: WsReader,
}

pub(crate) struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

pub(crate) struct WsReader {
    stream: SplitStream<WsStream>,
}

impl WsWriter {
    pub(crate) async fn send(&mut self, text: String) -> Result<(), WsError> {
        self.sink.send(Message::Text(text)).await
    }

    /// Send a close frame and flush. Errors are irrelevant at this point.
    pub(crate) async fn close(&mut self) {
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            debug!(error = %e, "close frame not delivered");
        }
        let _ = self.sink.close().await;
    }
}

impl WsReader {
    /// Next text payload. `None` once the peer closes or the socket fails.
    pub(crate) async fn receive(&mut self) -> Option<Result<String, WsError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(e) => warn!(error = %e, "dropping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "node closed the websocket");
                    return None;
                }
                // Pings are answered by tungstenite itself.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Open an authenticated websocket to the node described by `config`.
pub(crate) async fn connect(config: &ConnectionConfig) -> Result<WsConnection, CoreError> {
    let url = config.websocket_url()?;
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| CoreError::InvalidConfig(format!("invalid websocket request: {e}")))?;

    if let Some((user, pass)) = config.auth() {
        let token = STANDARD.encode(format!("{user}:{pass}"));
        let value = HeaderValue::from_str(&format!("Basic {token}"))
            .map_err(|e| CoreError::InvalidConfig(format!("invalid credentials: {e}")))?;
        request.headers_mut().insert(header::AUTHORIZATION, value);
    }

    let connector = match (config.tls_enabled(), config.certificates()) {
        (false, _) => Some(Connector::Plain),
        (true, Some(pem)) => Some(Connector::Rustls(Arc::new(tls::client_config(pem)?))),
        // System/webpki roots from the tungstenite feature set.
        (true, None) => None,
    };

    debug!(url = %url, tls = config.tls_enabled(), "connecting websocket");
    let (stream, response) = connect_async_tls_with_config(request, None, false, connector)
        .await
        .map_err(classify_handshake_error)?;
    info!(url = %url, status = %response.status(), "websocket connected");

    let (sink, stream) = stream.split();
    Ok(WsConnection {
        writer: WsWriter { sink },
        reader: WsReader { stream },
    })
}

/// Retry [`connect`] with exponential backoff until it succeeds, the policy
/// runs out of attempts, or `cancel` fires.
pub(crate) async fn reconnect(
    config: &ConnectionConfig,
    cancel: &CancellationToken,
) -> Option<WsConnection> {
    let policy = config.reconnect();
    let mut attempt = 1;
    while policy.allows_attempt(attempt) {
        let delay = policy.delay_for_attempt(attempt);
        info!(attempt, ?delay, "reconnecting to node");
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return None,
            outcome = connect(config) => outcome,
        };
        match outcome {
            Ok(connection) => return Some(connection),
            Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
        }
        attempt += 1;
    }
    warn!(attempts = attempt - 1, "giving up on reconnecting");
    None
}

fn classify_handshake_error(err: WsError) -> CoreError {
    let connect_err = match err {
        WsError::Http(response) => {
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                ConnectError::AuthRejected {
                    status: status.as_u16(),
                }
            } else {
                ConnectError::NetworkUnreachable(format!("handshake rejected with HTTP {status}"))
            }
        }
        WsError::Tls(e) => ConnectError::CertInvalid(e.to_string()),
        WsError::Io(e) if is_tls_failure(&e) => ConnectError::CertInvalid(e.to_string()),
        other => ConnectError::NetworkUnreachable(other.to_string()),
    };
    connect_err.into()
}

/// tokio-rustls reports handshake failures as `InvalidData` I/O errors
/// wrapping a `rustls::Error`.
fn is_tls_failure(err: &std::io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.downcast_ref::<rustls::Error>().is_some())
}

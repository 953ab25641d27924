//! Connection configuration and socket plumbing.

use crate::error::ClientError;
use crate::tls::create_tls_connector;
use agentrun_protocol::{ClientFrame, Encoder, DEFAULT_WS_PATH};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

pub(crate) type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// TLS configuration for `wss` connections.
///
/// Without a custom CA the bundled web PKI roots are used.
#[derive(Debug, Clone, Default)]
pub struct TlsClientConfig {
    /// Path to PEM-encoded CA certificate(s) for server verification.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client certificate (for mTLS).
    pub client_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client private key (for mTLS).
    pub client_key_path: Option<PathBuf>,
}

impl TlsClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL (`http`, `https`, `ws` or `wss`).
    pub base_url: String,
    /// Path of the agent-run endpoint, appended to the base URL path.
    pub ws_path: String,
    /// Bound on TCP connect plus WebSocket upgrade.
    pub connect_timeout: Duration,
    /// Bound on waiting for `ready` after the socket opened. `None` waits
    /// indefinitely.
    pub ready_timeout: Option<Duration>,
    /// Default time `cancel` waits for the server to close.
    pub cancel_grace: Duration,
    /// Time `close` waits for the close handshake before dropping the socket.
    pub close_timeout: Duration,
    /// Upper bound on bidirectional requests serviced at once. `None` is
    /// unbounded.
    pub max_concurrent_requests: Option<usize>,
    /// Send an error-shaped response when a request cannot be serviced.
    pub respond_on_servicing_failure: bool,
    /// TLS configuration (optional).
    pub tls: Option<TlsClientConfig>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            connect_timeout: Duration::from_secs(10),
            ready_timeout: None,
            cancel_grace: Duration::from_secs(2),
            close_timeout: Duration::from_secs(1),
            max_concurrent_requests: None,
            respond_on_servicing_failure: false,
            tls: None,
        }
    }

    pub fn with_ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_requests(mut self, limit: usize) -> Self {
        self.max_concurrent_requests = Some(limit.max(1));
        self
    }

    pub fn with_respond_on_servicing_failure(mut self, enabled: bool) -> Self {
        self.respond_on_servicing_failure = enabled;
        self
    }

    pub fn with_tls(mut self, tls_config: TlsClientConfig) -> Self {
        self.tls = Some(tls_config);
        self
    }

    /// Derives the endpoint URL: `http` maps to `ws`, `https` to `wss`, and
    /// the endpoint path is appended to the base path.
    pub fn websocket_url(&self) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ClientError::InvalidUrl(format!(
                    "unsupported scheme '{}'",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::InvalidUrl(format!("cannot use scheme '{}'", scheme)))?;

        let base = url.path().trim_end_matches('/');
        let path = format!("{}/{}", base, self.ws_path.trim_start_matches('/'));
        url.set_path(&path);
        url.set_query(None);
        url.set_fragment(None);

        Ok(url)
    }
}

/// Opens the WebSocket, bounded by the connect timeout.
pub(crate) async fn open_socket(config: &ClientConfig) -> Result<Socket, ClientError> {
    let url = config.websocket_url()?;
    tracing::debug!("Connecting to {}...", url);

    let connector = match config.tls {
        Some(ref tls_config) if url.scheme() == "wss" => Some(create_tls_connector(tls_config)?),
        _ => None,
    };

    let (socket, response) = tokio::time::timeout(
        config.connect_timeout,
        tokio_tungstenite::connect_async_tls_with_config(url.as_str(), None, true, connector),
    )
    .await
    .map_err(|_| {
        tracing::debug!("Connection timeout");
        ClientError::ConnectTimeout
    })?
    .map_err(|e| {
        tracing::debug!("Connection failed: {}", e);
        ClientError::ConnectionSetup(e.to_string())
    })?;

    tracing::debug!("WebSocket open (status {})", response.status());
    Ok(socket)
}

/// Work for the writer task.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(ClientFrame),
    Close { code: u16, reason: String },
}

/// Handle for queueing frames on the writer task.
///
/// Sends are ordered and never block. After the writer has stopped, sends are
/// dropped.
#[derive(Debug, Clone)]
pub(crate) struct OutboundSender {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl OutboundSender {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues a frame. Returns false if the writer has stopped.
    pub(crate) fn send(&self, frame: ClientFrame) -> bool {
        let name = frame.type_name();
        if self.tx.send(Outbound::Frame(frame)).is_err() {
            tracing::debug!("dropping {} frame: writer stopped", name);
            return false;
        }
        true
    }

    pub(crate) fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.tx.send(Outbound::Close {
            code,
            reason: reason.into(),
        });
    }
}

/// Writes queued frames in order until a close is written or the socket fails.
pub(crate) async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    tracing::debug!("write_loop started");

    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(frame) => {
                let text = match Encoder::encode_client(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("failed to encode {} frame: {}", frame.type_name(), e);
                        continue;
                    }
                };
                tracing::trace!("write_loop: sending {} ({} bytes)", frame.type_name(), text.len());
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::debug!("write_loop: send failed: {}", e);
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                tracing::debug!("write_loop: closing with {} ({})", code, reason);
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    tracing::debug!("write_loop: close failed: {}", e);
                }
                break;
            }
        }
    }

    tracing::debug!("write_loop stopped");
}

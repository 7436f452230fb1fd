// src/mcp/transport.rs
// Transport layer for MCP communication (stdio subprocess, HTTP, WebSocket)

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tracing::{debug, warn};

use super::protocol::{JsonRpcCodec, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest};

/// HTTP transport timeout. The spec requires >= 60s for slow servers.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Grace period before a stdio child is killed on disconnect.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// MCP transport I/O error
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport not connected")]
    NotConnected,
    #[error("Process error: {0}")]
    Process(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("Connection closed")]
    Closed,
}

/// Outbound JSON-RPC messages a transport can carry
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

impl OutboundMessage {
    fn encode(&self) -> Result<String, TransportError> {
        match self {
            OutboundMessage::Request(r) => JsonRpcCodec::encode_request(r),
            OutboundMessage::Notification(n) => JsonRpcCodec::encode_notification(n),
        }
    }

    /// Whether the peer is expected to reply
    fn expects_reply(&self) -> bool {
        matches!(self, OutboundMessage::Request(_))
    }
}

/// Transport abstraction over stdio, HTTP and WebSocket.
///
/// The client drives a background reader that loops `receive()` and hands
/// each inbound message to its correlation map.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;
    async fn receive(&self) -> Result<JsonRpcMessage, TransportError>;
    fn is_connected(&self) -> bool;
}

// ============================================================================
// Stdio transport
// ============================================================================

/// Spawns a child process and exchanges newline-delimited JSON over its pipes.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<String>,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<BufReader<ChildStdout>>>,
    connected: AtomicBool,
}

impl StdioTransport {
    pub fn new(
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<String>,
    ) -> Self {
        Self {
            command,
            args,
            env,
            cwd,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            stdout: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Overlay configured variables on top of the current environment
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::Process(format!("spawn '{}': {}", self.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Process("missing child stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Process("missing child stdout".into()))?;

        // Drain stderr for diagnostics
        if let Some(stderr) = child.stderr.take() {
            let command = self.command.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = String::new();
                while let Ok(n) = reader.read_line(&mut line).await {
                    if n == 0 {
                        break;
                    }
                    debug!("[MCP:stderr:{}] {}", command, line.trim_end());
                    line.clear();
                }
            });
        }

        // The child exiting before initialization is a transport failure
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(Some(status)) = child.try_wait() {
            return Err(TransportError::Process(format!(
                "process exited immediately with {}",
                status
            )));
        }

        *self.child.lock().await = Some(child);
        *self.stdin.lock().await = Some(stdin);
        *self.stdout.lock().await = Some(BufReader::new(stdout));
        self.connected.store(true, Ordering::SeqCst);
        debug!("[MCP] stdio transport connected: {}", self.command);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);

        // Closing stdin signals EOF; give the child a grace period, then
        // kill. The stdout half stays with the reader until it sees EOF.
        self.stdin.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(_) => debug!("[MCP] stdio child exited cleanly"),
                Err(_) => {
                    warn!("[MCP] stdio child did not exit within {:?}, killing", SHUTDOWN_GRACE);
                    let _ = child.kill().await;
                }
            }
        }
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let data = message.encode()?;
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::NotConnected)?;

        stdin.write_all(data.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn receive(&self) -> Result<JsonRpcMessage, TransportError> {
        let mut guard = self.stdout.lock().await;
        let stdout = guard.as_mut().ok_or(TransportError::NotConnected)?;

        let mut line = String::new();
        let n = stdout.read_line(&mut line).await?;
        if n == 0 {
            self.connected.store(false, Ordering::SeqCst);
            return Err(TransportError::Closed);
        }

        JsonRpcCodec::decode(line.trim())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ============================================================================
// HTTP transport
// ============================================================================

/// One POST per outbound request; the response body is the paired inbound
/// message, queued so the client's reader loop picks it up via `receive()`.
pub struct HttpTransport {
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
    inbound_tx: mpsc::UnboundedSender<JsonRpcMessage>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
    connected: AtomicBool,
}

impl HttpTransport {
    pub fn new(url: String, headers: HashMap<String, String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            url,
            headers,
            client,
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        // HTTP is connectionless; the first POST proves reachability
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let data = message.encode()?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request
            .body(data)
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("POST {}: {}", self.url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {}: {}", status, body)));
        }

        // Notifications expect no reply; discard whatever the server returned
        if !message.expects_reply() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Http(format!("read body: {}", e)))?;
        let inbound = JsonRpcCodec::decode(body.trim())?;
        let _ = self.inbound_tx.send(inbound);
        Ok(())
    }

    async fn receive(&self) -> Result<JsonRpcMessage, TransportError> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ============================================================================
// WebSocket transport
// ============================================================================

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsFrame,
>;
type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Full-duplex transport over WebSocket text frames.
pub struct WebSocketTransport {
    url: String,
    headers: HashMap<String, String>,
    sink: Mutex<Option<WsSink>>,
    stream: Mutex<Option<WsStream>>,
    connected: AtomicBool,
}

impl WebSocketTransport {
    pub fn new(url: String, headers: HashMap<String, String>) -> Self {
        Self {
            url,
            headers,
            sink: Mutex::new(None),
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl McpTransport for WebSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut request = self
            .url
            .clone()
            .into_client_request()
            .map_err(|e| TransportError::WebSocket(format!("bad url {}: {}", self.url, e)))?;
        for (key, value) in &self.headers {
            let name: tokio_tungstenite::tungstenite::http::HeaderName = key
                .parse()
                .map_err(|_| TransportError::WebSocket(format!("bad header name: {}", key)))?;
            let val = value
                .parse()
                .map_err(|_| TransportError::WebSocket(format!("bad header value for {}", key)))?;
            request.headers_mut().insert(name, val);
        }

        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::WebSocket(format!("connect {}: {}", self.url, e)))?;
        let (sink, stream) = ws.split();

        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        self.connected.store(true, Ordering::SeqCst);
        debug!("[MCP] websocket transport connected: {}", self.url);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        // The receive half stays with the reader; it unblocks on the close
        // frame or when the reader task is dropped.
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let data = message.encode()?;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(WsFrame::text(data))
            .await
            .map_err(|e| TransportError::WebSocket(format!("send: {}", e)))
    }

    async fn receive(&self) -> Result<JsonRpcMessage, TransportError> {
        loop {
            let frame = {
                let mut guard = self.stream.lock().await;
                let stream = guard.as_mut().ok_or(TransportError::NotConnected)?;
                stream.next().await
            };

            match frame {
                Some(Ok(WsFrame::Text(text))) => return JsonRpcCodec::decode(&text),
                Some(Ok(WsFrame::Close(_))) | None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::Closed);
                }
                Some(Ok(_)) => continue, // ping/pong/binary frames
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::WebSocket(format!("receive: {}", e)));
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, mpsc};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use wb_tail::{TailMessage, TailSession};

use crate::context::SharedContext;
use crate::handshake::{self, Handshake, Route};
use crate::rpc::{JsonRpcRequest, JsonRpcResponse, PARSE_ERROR, RpcConnection};
use crate::tail_task::{self, TAIL_CHANNEL_CAPACITY};

type WsStream = WebSocketStream<TcpStream>;
type WsSink = SplitSink<WsStream, Message>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

// ---------------------------------------------------------------------------
// WsServer
// ---------------------------------------------------------------------------

/// WebSocket server for the file browser.
///
/// Two routes share one listener: `/rpc` carries JSON-RPC 2.0 requests in
/// text frames, `/tail/<path>` streams one tail session as JSON frames.
pub struct WsServer {
    ctx: SharedContext,
    cancel: CancellationToken,
}

impl WsServer {
    pub fn new(ctx: SharedContext, cancel: CancellationToken) -> Self {
        Self { ctx, cancel }
    }

    /// Bind, accept connections and spawn per-client handlers until the
    /// cancellation token fires.
    pub async fn run(&self) -> std::io::Result<()> {
        let (listener, _) = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind the configured host, trying successive ports while the current
    /// one is in use. Port 0 asks the OS for an ephemeral port.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let config = &self.ctx.config;
        let attempts = if config.port == 0 { 1 } else { config.port_attempts.max(1) };

        let mut last_err = None;
        for i in 0..attempts {
            let Some(port) = config.port.checked_add(i) else {
                break;
            };
            match TcpListener::bind((config.host.as_str(), port)).await {
                Ok(listener) => {
                    let local_addr = listener.local_addr()?;
                    if port != config.port {
                        tracing::warn!(
                            requested = config.port,
                            port = local_addr.port(),
                            "ws server: requested port busy, using next free port"
                        );
                    }
                    tracing::info!(
                        addr = %local_addr,
                        max_connections = config.max_connections,
                        "ws server bound"
                    );
                    return Ok((listener, local_addr));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    tracing::debug!(port, "ws server: port in use");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "no free port in range")
        }))
    }

    /// Run the accept loop on a pre-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let max_connections = self.ctx.config.max_connections;
        let semaphore = Arc::new(Semaphore::new(max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let permit = match semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    tracing::warn!(
                                        peer = %peer,
                                        max = max_connections,
                                        "ws: connection limit reached, rejecting"
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };
                            tracing::debug!(peer = %peer, "ws: TCP connection accepted");
                            let ctx = Arc::clone(&self.ctx);
                            let cancel = self.cancel.clone();
                            tokio::spawn(async move {
                                let _permit = permit;
                                if let Err(e) = handle_connection(stream, ctx, cancel).await {
                                    tracing::debug!(peer = %peer, error = %e, "ws client handler finished with error");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "ws: TCP accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("ws server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-client handlers
// ---------------------------------------------------------------------------

async fn handle_connection(
    stream: TcpStream,
    ctx: SharedContext,
    cancel: CancellationToken,
) -> HandlerResult {
    let mut captured: Option<Handshake> = None;
    let origins = ctx.config.allowed_origins.clone();
    let callback = |req: &Request, resp: Response| {
        handshake::inspect(req, resp, &origins, &mut captured)
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let Some(Handshake { route, credential }) = captured else {
        return Ok(());
    };

    match route {
        Route::Rpc => handle_rpc(ws_stream, ctx, credential, cancel).await,
        Route::Tail(path) => handle_tail(ws_stream, ctx, path, credential, cancel).await,
        Route::Unknown(path) => {
            tracing::debug!(path = %path, "ws: unknown route");
            let (mut ws_tx, _) = ws_stream.split();
            close(&mut ws_tx, CloseCode::Policy, "unknown route").await;
            Ok(())
        }
    }
}

async fn handle_rpc(
    ws_stream: WsStream,
    ctx: SharedContext,
    credential: Option<String>,
    cancel: CancellationToken,
) -> HandlerResult {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let identity = ctx.auth.authenticate_opt(credential.as_deref());
    let mut conn = RpcConnection::new(ctx, identity);

    tracing::debug!(authenticated = conn.is_authenticated(), "ws rpc client connected");

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "ws read error, dropping client");
                        return Err(e.into());
                    }
                    None => {
                        tracing::debug!("ws client disconnected (stream ended)");
                        return Ok(());
                    }
                };

                let text = match msg {
                    Message::Text(t) => t,
                    Message::Close(_) => {
                        tracing::debug!("ws client sent close frame");
                        return Ok(());
                    }
                    Message::Ping(data) => {
                        ws_tx.send(Message::Pong(data)).await?;
                        continue;
                    }
                    _ => continue,
                };

                let resp = match serde_json::from_str::<JsonRpcRequest>(&text) {
                    Ok(req) => conn.handle(req).await,
                    Err(e) => JsonRpcResponse::err(None, PARSE_ERROR, format!("parse error: {e}")),
                };
                ws_tx.send(Message::Text(serde_json::to_string(&resp)?)).await?;
            }
            _ = cancel.cancelled() => {
                tracing::debug!("ws rpc handler: cancellation requested");
                close(&mut ws_tx, CloseCode::Away, "server shutting down").await;
                return Ok(());
            }
        }
    }
}

async fn handle_tail(
    ws_stream: WsStream,
    ctx: SharedContext,
    path: String,
    credential: Option<String>,
    cancel: CancellationToken,
) -> HandlerResult {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Authenticate before the path is even resolved.
    let Some(identity) = ctx.auth.authenticate_opt(credential.as_deref()) else {
        tracing::warn!(path = %path, "tail: unauthenticated connection");
        let message = TailMessage::Error {
            message: "not authenticated".into(),
        };
        send_tail(&mut ws_tx, &message).await?;
        close(&mut ws_tx, CloseCode::Policy, "not authenticated").await;
        return Ok(());
    };

    let resolved = match wb_core::resolve(ctx.root(), &path) {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::debug!(path = %path, error = %e, "tail: path rejected");
            let message = TailMessage::Error {
                message: e.client_message(),
            };
            send_tail(&mut ws_tx, &message).await?;
            close(&mut ws_tx, CloseCode::Normal, "").await;
            return Ok(());
        }
    };

    let session = TailSession::new(resolved, path.as_str(), ctx.config.replay_lines);
    let (tx, mut rx) = mpsc::channel(TAIL_CHANNEL_CAPACITY);
    let session_cancel = cancel.child_token();
    let driver = tokio::spawn(tail_task::run_tail(
        session,
        Some(identity),
        tx,
        session_cancel.clone(),
        ctx.config.poll_interval,
    ));

    tracing::info!(path = %path, "tail: session started");

    let result = pump_tail(&mut ws_tx, &mut ws_rx, &mut rx, &cancel).await;

    session_cancel.cancel();
    match driver.await {
        Ok(state) => tracing::info!(path = %path, state = ?state, "tail: session ended"),
        Err(e) => tracing::warn!(path = %path, error = %e, "tail: driver task failed"),
    }
    result
}

/// Relay driver messages to the socket until the session ends, the client
/// leaves or the server shuts down.
async fn pump_tail(
    ws_tx: &mut WsSink,
    ws_rx: &mut SplitStream<WsStream>,
    rx: &mut mpsc::Receiver<TailMessage>,
    cancel: &CancellationToken,
) -> HandlerResult {
    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else {
                    close(ws_tx, CloseCode::Normal, "").await;
                    return Ok(());
                };
                send_tail(ws_tx, &message).await?;
                if matches!(message, TailMessage::Error { .. }) {
                    close(ws_tx, CloseCode::Normal, "").await;
                    return Ok(());
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => ws_tx.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
            _ = cancel.cancelled() => {
                close(ws_tx, CloseCode::Away, "server shutting down").await;
                return Ok(());
            }
        }
    }
}

async fn send_tail(ws_tx: &mut WsSink, message: &TailMessage) -> HandlerResult {
    ws_tx.send(Message::Text(serde_json::to_string(message)?)).await?;
    Ok(())
}

async fn close(ws_tx: &mut WsSink, code: CloseCode, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = ws_tx.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "ws: close frame not delivered");
    }
}

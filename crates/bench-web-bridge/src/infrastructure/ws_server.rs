//! WebSocket server: accept loop and per-session task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from clients.
//! 3. Upgrading each connection to a WebSocket session.
//! 4. Attaching each session to the telemetry channel (stale backlog purged).
//! 5. Running two concurrent halves per session:
//!    - **Device → Client**: telemetry frames, as `Telemetry` JSON messages.
//!    - **Client → Device**: JSON requests, handed to the [`DeviceService`],
//!      answered with `Accepted`, `Status` or `Error`.
//! 6. Releasing the device when a session ends (a running streaming mode is
//!    closed).
//! 7. Shutting down when the shutdown signal fires: the accept loop stops, every
//!    open session is closed and released, then [`run_server`] returns.
//!
//! Each session runs in its own Tokio task, so one slow client never blocks
//! the accept loop or other clients.
//!
//! [`DeviceService`]: crate::application::DeviceService

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use bench_broker::wait_for_shutdown;
use bench_core::Frame;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::application::{ClientGone, FrameSink, RelayEnd, TelemetryRelay};
use crate::domain::messages::{ClientRequest, ServerMessage};

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `bind_addr` and serves clients until `shutdown` fires.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server(
    bind_addr: SocketAddr,
    relay: Arc<TelemetryRelay>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {bind_addr}"))?;

    info!("WebSocket bridge listening on {bind_addr}");
    serve(listener, relay, shutdown).await;
    Ok(())
}

/// Runs the accept loop on an already bound listener.
///
/// Returns after shutdown, once every session has ended and released the
/// device.
pub async fn serve(
    listener: TcpListener,
    relay: Arc<TelemetryRelay>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            Some(_) = sessions.join_next(), if !sessions.is_empty() => continue,
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("shutdown requested; stopping accept loop");
                break;
            }
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                info!("new client connection from {peer_addr}");
                let relay = Arc::clone(&relay);
                let shutdown = shutdown.clone();
                sessions.spawn(handle_client_session(stream, peer_addr, relay, shutdown));
            }
            Err(e) => {
                // Transient accept error (e.g., too many open file descriptors).
                // Log it and continue rather than crashing the whole bridge.
                error!("accept error: {e}");
            }
        }
    }

    let open = sessions.len();
    if open > 0 {
        info!(open, "waiting for client sessions to close");
    }
    while sessions.join_next().await.is_some() {}
}

// ── Per-session handler ───────────────────────────────────────────────────────

/// Runs one session and logs how it ended.
async fn handle_client_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    relay: Arc<TelemetryRelay>,
    shutdown: watch::Receiver<bool>,
) {
    match run_session(raw_stream, peer_addr, relay, shutdown).await {
        Ok(()) => info!("session {peer_addr} closed normally"),
        Err(e) => warn!("session {peer_addr} closed with error: {e:#}"),
    }
}

/// Runs the complete lifecycle of a single client session.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails or the telemetry
/// channel cannot be subscribed to.
async fn run_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    relay: Arc<TelemetryRelay>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    // ── Step 1: Complete the WebSocket handshake ───────────────────────────────
    let ws_stream = accept_async(raw_stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let session_id = uuid::Uuid::new_v4().simple().to_string();
    info!("WebSocket session {session_id} established with {peer_addr}");

    let (ws_tx, mut ws_rx) = ws_stream.split();
    let ws_tx = Arc::new(Mutex::new(ws_tx));

    // ── Step 2: Subscribe to telemetry ────────────────────────────────────────
    let subscription = match relay.attach(&session_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            let _ = send_message(&ws_tx, &ServerMessage::error(&e)).await;
            let _ = ws_tx.lock().await.close().await;
            return Err(e).context("telemetry channel unavailable");
        }
    };

    // ── Step 3: Device → Client ───────────────────────────────────────────────
    let mut sink = WsFrameSink {
        ws_tx: Arc::clone(&ws_tx),
    };
    let telemetry_half = relay.relay(subscription, &mut sink);

    // ── Step 4: Client → Device ───────────────────────────────────────────────
    let service = Arc::clone(relay.service());
    let request_ws_tx = Arc::clone(&ws_tx);
    let session_id_requests = session_id.clone();
    let request_half = async move {
        while let Some(msg_result) = ws_rx.next().await {
            let msg = match msg_result {
                Ok(m) => m,
                Err(WsError::ConnectionClosed | WsError::Protocol(_)) => {
                    debug!("session {session_id_requests}: client disconnected");
                    break;
                }
                Err(e) => {
                    warn!("session {session_id_requests}: WebSocket receive error: {e}");
                    break;
                }
            };

            match msg {
                WsMessage::Text(text) => {
                    let request: ClientRequest = match serde_json::from_str(&text) {
                        Ok(r) => r,
                        Err(e) => {
                            warn!("session {session_id_requests}: invalid JSON from client: {e}");
                            continue;
                        }
                    };
                    debug!("session {session_id_requests}: {} request", request.kind());

                    let reply = service.handle(request).await;
                    if send_message(&request_ws_tx, &reply).await.is_err() {
                        break;
                    }
                }
                WsMessage::Binary(_) => {
                    // The client protocol is JSON-only.
                    warn!("session {session_id_requests}: unexpected binary WebSocket frame (ignored)");
                }
                WsMessage::Close(_) => {
                    debug!("session {session_id_requests}: WebSocket Close frame received");
                    break;
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    };

    // ── Step 5: Wait for either half, or shutdown ─────────────────────────────
    //
    // Whichever finishes first ends the session; the other half is dropped.
    tokio::select! {
        end = telemetry_half => match end {
            RelayEnd::SourceClosed => info!("session {session_id}: telemetry source closed"),
            RelayEnd::ClientGone => debug!("session {session_id}: client stopped receiving"),
        },
        _ = request_half => debug!("session {session_id}: client request stream ended"),
        _ = wait_for_shutdown(&mut shutdown) => {
            debug!("session {session_id}: closing for shutdown");
            let _ = ws_tx.lock().await.close().await;
        }
    }

    // ── Step 6: Release the device ────────────────────────────────────────────
    relay.detach(&session_id).await;
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Serializes `msg` and sends it as one text frame.
async fn send_message(ws_tx: &Mutex<WsSink>, msg: &ServerMessage) -> Result<(), ClientGone> {
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(e) => {
            error!("failed to serialize server message: {e}");
            return Ok(());
        }
    };
    ws_tx
        .lock()
        .await
        .send(WsMessage::Text(json))
        .await
        .map_err(|_| ClientGone)
}

/// Delivers telemetry frames to one WebSocket client.
struct WsFrameSink {
    ws_tx: Arc<Mutex<WsSink>>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn deliver(&mut self, frame: Frame) -> Result<(), ClientGone> {
        send_message(&self.ws_tx, &ServerMessage::telemetry(frame)).await
    }
}

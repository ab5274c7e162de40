//! WebSocket Connection
//!
//! One loop per accepted socket. Outbound traffic flows through the
//! connection's [`ClientSink`]; inbound text frames are handed to an
//! endpoint-specific [`ConnectionHandler`].

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::hub::ConnectionHub;
use super::sink::ClientSink;
use crate::auth::AuthUser;
use crate::chat::{ChatClientMessage, ChatOrchestrator, ChatServerMessage, RequestContext};
use crate::metrics::ServerMetrics;
use crate::terminal::{
    PtySession, PtySessionManager, TerminalClientMessage, TerminalServerMessage,
};

/// Endpoint-specific handling of inbound frames.
#[async_trait]
pub trait ConnectionHandler: Send {
    async fn on_text(&mut self, text: &str);

    /// Runs once after the socket is gone.
    async fn on_disconnect(&mut self);
}

/// Ping bookkeeping for one connection.
#[derive(Default)]
struct Heartbeat {
    awaiting_pong: AtomicBool,
}

#[derive(Debug, PartialEq, Eq)]
enum Beat {
    /// Send a ping and wait for its pong
    Ping,
    /// The previous ping was never answered
    Missed,
}

impl Heartbeat {
    fn tick(&self) -> Beat {
        if self.awaiting_pong.swap(true, Ordering::SeqCst) {
            Beat::Missed
        } else {
            Beat::Ping
        }
    }

    fn pong(&self) {
        self.awaiting_pong.store(false, Ordering::SeqCst);
    }
}

/// Drive `socket` until it closes or misses a heartbeat.
pub async fn handle_connection<H: ConnectionHandler>(
    socket: WebSocket,
    sink: ClientSink,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut handler: H,
    hub: Arc<ConnectionHub>,
    metrics: Arc<ServerMetrics>,
    heartbeat_interval: Duration,
) {
    let conn_id = sink.id();
    info!(conn_id, "WebSocket connection opened");
    metrics.connection_opened();
    hub.register(sink.clone()).await;

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let heartbeat = Heartbeat::default();

    // Lifecycle broadcasts (streaming started/ended) reach every connection
    let mut lifecycle_rx = hub.subscribe_lifecycle();
    let lifecycle_sink = sink.clone();
    let lifecycle_task = async move {
        loop {
            match lifecycle_rx.recv().await {
                Ok(msg) => {
                    if !lifecycle_sink.send(&msg) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(conn_id, "Lifecycle broadcast lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    // Task to send messages and heartbeats to the WebSocket
    let sender_task = async {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + heartbeat_interval,
            heartbeat_interval,
        );
        loop {
            tokio::select! {
                msg = outbound.recv() => {
                    let Some(json) = msg else { break };
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => match heartbeat.tick() {
                    Beat::Ping => {
                        if ws_sender.send(Message::Ping(Bytes::new())).await.is_err() {
                            break;
                        }
                    }
                    Beat::Missed => {
                        warn!(conn_id, "Heartbeat not answered, dropping connection");
                        metrics.heartbeat_timeout();
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                },
            }
        }
    };

    // Task to handle incoming messages
    let input_task = async {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => handler.on_text(text.as_str()).await,
                Ok(Message::Pong(_)) => heartbeat.pong(),
                Ok(Message::Close(_)) => {
                    debug!(conn_id, "Client closed connection");
                    break;
                }
                Err(e) => {
                    error!(conn_id, "WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = lifecycle_task => debug!(conn_id, "Lifecycle task ended"),
        _ = sender_task => debug!(conn_id, "Sender task ended"),
        _ = input_task => debug!(conn_id, "Input task ended"),
    }

    handler.on_disconnect().await;
    hub.unregister(conn_id).await;
    metrics.connection_closed();
    info!(conn_id, "WebSocket connection closed");
}

// =============================================================================
// /shell
// =============================================================================

pub struct TerminalConnection {
    sink: ClientSink,
    user: AuthUser,
    manager: Arc<PtySessionManager>,
    metrics: Arc<ServerMetrics>,
    session: Option<Arc<PtySession>>,
}

impl TerminalConnection {
    pub fn new(
        sink: ClientSink,
        user: AuthUser,
        manager: Arc<PtySessionManager>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            sink,
            user,
            manager,
            metrics,
            session: None,
        }
    }

    fn report(&self, message: &str) {
        self.sink.send(&TerminalServerMessage::error_line(message));
    }
}

#[async_trait]
impl ConnectionHandler for TerminalConnection {
    async fn on_text(&mut self, text: &str) {
        let msg = match serde_json::from_str::<TerminalClientMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                self.metrics.message_error();
                warn!(conn_id = self.sink.id(), "Malformed terminal message: {}", e);
                self.report(&format!("Invalid message: {}", e));
                return;
            }
        };

        match msg {
            TerminalClientMessage::Init(req) => {
                info!(
                    conn_id = self.sink.id(),
                    user = %self.user.username,
                    "Terminal init for {}",
                    req.session_key()
                );
                if let Some(previous) = self.session.take() {
                    if previous.key() != req.session_key() {
                        self.manager.detach(&previous, self.sink.id()).await;
                    }
                }
                self.session = self.manager.init(&self.sink, &req).await;
            }
            TerminalClientMessage::Input { data } => {
                let Some(session) = &self.session else {
                    debug!(conn_id = self.sink.id(), "Input before init ignored");
                    return;
                };
                if let Err(e) = self.manager.input(session, self.sink.id(), &data).await {
                    warn!(session = %session.key(), "Write failed: {}", e);
                    self.report(&e.to_string());
                }
            }
            TerminalClientMessage::Resize { cols, rows } => {
                let Some(session) = &self.session else {
                    return;
                };
                if let Err(e) = self
                    .manager
                    .resize(session, self.sink.id(), cols, rows)
                    .await
                {
                    warn!(session = %session.key(), "Resize failed: {}", e);
                    self.report(&e.to_string());
                }
            }
        }
    }

    async fn on_disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            self.manager.detach(&session, self.sink.id()).await;
        }
    }
}

// =============================================================================
// /ws
// =============================================================================

pub struct ChatConnection {
    ctx: RequestContext,
    orchestrator: Arc<ChatOrchestrator>,
    metrics: Arc<ServerMetrics>,
}

impl ChatConnection {
    pub fn new(
        sink: ClientSink,
        user: AuthUser,
        orchestrator: Arc<ChatOrchestrator>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            ctx: RequestContext {
                sink,
                user: Some(user),
            },
            orchestrator,
            metrics,
        }
    }
}

#[async_trait]
impl ConnectionHandler for ChatConnection {
    async fn on_text(&mut self, text: &str) {
        match serde_json::from_str::<ChatClientMessage>(text) {
            Ok(msg) => self.orchestrator.handle(&self.ctx, msg).await,
            Err(e) => {
                self.metrics.message_error();
                warn!(conn_id = self.ctx.sink.id(), "Malformed chat message: {}", e);
                self.ctx.sink.send(&ChatServerMessage::Error {
                    error: format!("Invalid message: {}", e),
                });
            }
        }
    }

    async fn on_disconnect(&mut self) {
        // Runs already started keep streaming; their sends just fail.
    }
}

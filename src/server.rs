//! HTTP/WebSocket front end
//!
//! One Axum app: a liveness string on `GET /`, the WebSocket upgrade on
//! `GET /ws`, plus `/health` and `/metrics` for monitoring. Each socket gets
//! a sender task draining its outbound channel while the receive loop feeds
//! frames to the router in arrival order.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::hub::Hub;
use crate::protocol::ServerMessage;
use crate::router::MessageRouter;

/// Shared state for the Axum handlers
#[derive(Clone)]
pub struct ServerState {
    hub: Arc<Hub>,
    router: Arc<MessageRouter>,
}

impl ServerState {
    pub fn new(hub: Arc<Hub>) -> Self {
        let router = Arc::new(MessageRouter::new(hub.clone()));
        Self { hub, router }
    }
}

/// Build the Axum router with all hub endpoints.
pub fn create_app(state: ServerState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Bind and serve until the shutdown future completes.
pub async fn serve(
    addr: SocketAddr,
    state: ServerState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_app(state);
    let listener = TcpListener::bind(addr).await?;

    info!("Session hub listening on http://{}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Session hub stopped");
    Ok(())
}

async fn index_handler() -> &'static str {
    "duel-hub is alive"
}

async fn health_handler(State(state): State<ServerState>) -> Response {
    let connections = state.hub.sessions.connection_count().unwrap_or(0);
    let queue = state.hub.queue.len().unwrap_or(0);
    let rooms = state.hub.rooms.room_count().unwrap_or(0);

    Json(json!({
        "status": "ok",
        "connections": connections,
        "queueDepth": queue,
        "spectateRooms": rooms,
    }))
    .into_response()
}

async fn metrics_handler(State(state): State<ServerState>) -> Response {
    let families = state.hub.metrics.registry().gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    match encoder.encode(&families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "encode failure").into_response()
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection lifecycle: register, pump, clean up.
async fn handle_socket(socket: WebSocket, state: ServerState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = match state.hub.attach_connection(tx) {
        Ok(conn_id) => conn_id,
        Err(e) => {
            error!("Failed to register connection: {}", e);
            return;
        }
    };
    info!(conn_id = %conn_id, "WebSocket connection established");

    // Outbound pump: serialize and push until the channel or socket closes.
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize outbound frame: {}", e);
                }
            }
        }
    });

    // Inbound frames are processed strictly in arrival order.
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Some(reply) = state.router.handle_frame(conn_id, &text).await {
                    if !send_reply(&state, conn_id, reply) {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => {
                debug!(conn_id = %conn_id, "Client closed the connection");
                break;
            }
            Ok(_) => {
                // Binary/ping/pong frames are not part of the protocol.
            }
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    if let Err(e) = state.hub.handle_disconnect(conn_id).await {
        warn!(conn_id = %conn_id, error = %e, "Disconnect cleanup failed");
    }
    send_task.abort();
}

/// Queue a reply onto the connection's outbound channel. A failed send means
/// the connection is gone, which ends the receive loop.
fn send_reply(state: &ServerState, conn_id: crate::types::ConnId, reply: ServerMessage) -> bool {
    match state.hub.sessions.send_to(conn_id, reply) {
        Ok(delivered) => delivered,
        Err(e) => {
            warn!(conn_id = %conn_id, error = %e, "Failed to queue reply");
            false
        }
    }
}

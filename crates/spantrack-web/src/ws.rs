//! WebSocket handler for realtime span updates

use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use spantrack_core::RealtimeMessage;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Subscribes before the upgrade completes, so a client that seeds right
/// after the handshake cannot miss a write made in between.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let rx = state.broadcaster.subscribe();
    let closing = state.closing();
    ws.on_upgrade(move |socket| handle_socket(socket, rx, closing))
}

async fn handle_socket(
    mut socket: WebSocket,
    mut rx: Receiver<Arc<RealtimeMessage>>,
    mut closing: watch::Receiver<bool>,
) {
    debug!("Realtime observer connected");

    loop {
        tokio::select! {
            _ = closing.changed() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            result = rx.recv() => {
                match result {
                    Ok(message) => {
                        match serde_json::to_string(message.as_ref()) {
                            Ok(json) => {
                                if socket.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Failed to encode realtime message: {}", e),
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("Realtime observer lagged, skipped {} messages", n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("Realtime socket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    debug!("Realtime observer disconnected");
}

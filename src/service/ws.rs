//! WebSocket subscriber sessions.
//!
//! A session registers with the notifier on upgrade and forwards its queue
//! to the socket. Clients have nothing to say back; inbound frames are only
//! watched for close. Any send error, a send that outlives the configured
//! timeout, or server shutdown ends the session and unregisters it.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::server::ServerState;

/// WebSocket upgrade handler for change subscriptions.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let registry = Arc::clone(state.notifier.registry());
    let shutdown = state.notifier.shutdown_token();
    let (id, mut queue) = registry.register();
    let (mut sink, mut inbound) = socket.split();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            payload = queue.recv() => {
                let Some(payload) = payload else {
                    // Dropped from the registry
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                match tokio::time::timeout(state.send_timeout, sink.send(Message::Text(payload.to_string()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(connection_id = %id, error = %e, "WebSocket send failed");
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(
                            connection_id = %id,
                            timeout_ms = state.send_timeout.as_millis() as u64,
                            "WebSocket send timed out, dropping client"
                        );
                        break;
                    }
                }
            }
            frame = inbound.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    }

    registry.unregister(&id);
}

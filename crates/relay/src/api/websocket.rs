//! WebSocket handling for device connections.
//!
//! Every valid text frame is forwarded unchanged to all other devices.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use rift_shared::BroadcastMessage;

use crate::RelayState;

/// Buffer size for per-connection message channel.
const CONNECTION_CHANNEL_BUFFER: usize = 256;

/// WebSocket upgrade handler - entry point for new connections.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<RelayState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an individual WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let connection_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<String>(CONNECTION_CHANNEL_BUFFER);
    state.connections.register(connection_id, tx).await;

    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    // Forward peer broadcasts from the channel to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => relay_frame(&state, connection_id, text.as_str()).await,
            Ok(Message::Close(_)) => {
                tracing::info!(connection_id = %connection_id, "WebSocket closed by client");
                break;
            }
            Err(e) => {
                tracing::error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    state.connections.unregister(connection_id).await;
    send_task.abort();

    tracing::info!(connection_id = %connection_id, "WebSocket connection terminated");
}

async fn relay_frame(state: &RelayState, connection_id: Uuid, text: &str) {
    let message = match BroadcastMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(connection_id = %connection_id, error = %e, "Dropping invalid broadcast");
            return;
        }
    };

    if let Err(e) = state
        .connections
        .identify(connection_id, &message.device_id)
        .await
    {
        tracing::warn!(connection_id = %connection_id, error = %e, "Broadcast from unknown connection");
        return;
    }

    let delivered = state.connections.broadcast_except(connection_id, text).await;
    tracing::debug!(
        connection_id = %connection_id,
        device_id = %message.device_id,
        fields = message.fields.len(),
        delivered,
        "Relayed broadcast"
    );
}

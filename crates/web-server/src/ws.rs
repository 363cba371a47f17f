use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use crate::{handlers, AppState};

/// # GET /api/ws
pub async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Pushes the initial snapshot, then fans out dashboard events from the
/// bus until the client goes away.
///
/// The socket is split into its sink and stream halves so the event
/// forwarder and the client reader can run as independent tasks; whichever
/// finishes first tears the other down.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    tracing::info!("Dashboard WebSocket client connected.");

    let initial_json = match handlers::initial_frame(&state).await {
        Ok(frame) => match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode initial frame.");
                return;
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to build initial frame.");
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();
    let mut events = state.bus.subscribe();

    let mut send_task = tokio::spawn(async move {
        if sender.send(Message::Text(initial_json)).await.is_err() {
            return;
        }
        loop {
            match events.recv().await {
                Ok(message) if message.is_dashboard_event() => {
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to encode event frame.");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "WebSocket client lagged behind the bus.");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // The dashboard never sends data frames; this half only notices the
    // client going away.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!("Dashboard WebSocket client disconnected.");
}

/// Push channel ingest
///
/// The persistent socket delivering named JSON events terminates here: each
/// text frame is parsed into a [`PushEnvelope`] and forwarded into the sync
/// manager's event pipe. Framing beyond `{"event": ..., "data": ...}` is
/// not interpreted; unparseable frames are logged and dropped, never fatal
/// to the connection.
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::models::PushEnvelope;

#[utoipa::path(
    get,
    path = "/api/push",
    responses(
        (status = 101, description = "Switching protocols: push event ingest socket")
    ),
    tag = "push"
)]
pub async fn push_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("Push source connected");

    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Push socket error, closing");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                match serde_json::from_str::<PushEnvelope>(&text) {
                    Ok(envelope) => {
                        if state.push_tx.send(envelope).await.is_err() {
                            warn!("Push pipe closed, dropping connection");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Dropping unparseable push frame");
                    }
                }
            }
            Message::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of the protocol
            _ => {}
        }
    }

    info!("Push source disconnected");
}

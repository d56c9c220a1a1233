//! WebSocket front-end for message-based ingest.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tracing::{debug, warn};

use crate::auth::{Owner, SessionKey};
use crate::state::AppState;
use crate::upload_session::{Ack, UploadSession};

/// Room for the JSON control messages on top of one window.
const CONTROL_HEADROOM: usize = 64 * 1024;

/// `GET /api/file/upload`
pub async fn upgrade(
    State(state): State<AppState>,
    Owner(owner): Owner,
    SessionKey(wrapping_key): SessionKey,
    ws: WebSocketUpgrade,
) -> Response {
    // Window size was checked against usize when the engine was built
    let max_message = (state.engine.window_size() as usize).saturating_add(CONTROL_HEADROOM);
    let session = UploadSession::new(state.engine.clone(), owner, wrapping_key);
    ws.max_message_size(max_message)
        .on_upgrade(move |socket| run(socket, session))
}

/// Drive one upload to completion on `socket`.
async fn run(mut socket: WebSocket, mut session: UploadSession) {
    while let Some(message) = socket.recv().await {
        let result = match message {
            Ok(Message::Text(text)) => session.on_text(text.as_str()).await,
            Ok(Message::Binary(frame)) => session.on_binary(&frame).await,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!(error = %e, "Upload socket failed");
                break;
            }
        };

        let ack = match result {
            Ok(ack) => ack,
            Err(e) => {
                warn!(error = %e, "Upload rejected");
                Ack::error(&e)
            }
        };
        if !send(&mut socket, &ack).await {
            break;
        }
        if session.is_finished() {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    }

    session.abort().await;
}

async fn send(socket: &mut WebSocket, ack: &Ack) -> bool {
    let json = match ack.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to encode upload ack");
            return false;
        }
    };
    socket.send(Message::Text(json.into())).await.is_ok()
}

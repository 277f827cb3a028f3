//! The WebSocket transport (§6, §10.6): one connection per session, a
//! split reader/writer task pair, with the writer fed by the session's
//! broadcast receiver so outbound messages never block on the socket.
//! There is no separate session-bootstrap endpoint — a session is
//! created lazily on its first WebSocket upgrade and lives exactly as
//! long as that connection.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use futures::{SinkExt, StreamExt};

use crate::message::ServerMessage;
use crate::session::IngestOutcome;
use crate::state::AppState;

/// `GET /ws/:session_id` — creates the session and upgrades to a
/// WebSocket. A second upgrade for an id already in the registry is
/// rejected rather than silently replacing the live session.
pub async fn ws_handler(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    if state.get_session(&session_id).is_some() {
        return Err(StatusCode::CONFLICT);
    }

    let (session, outbound_rx) = state.create_session(session_id.clone()).map_err(StatusCode::from)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, session, outbound_rx)))
}

/// Kept as a named type for the crate's public surface; the real work
/// happens in the two tasks spawned by `handle_socket`.
pub struct WebSocketHandler;

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    session: std::sync::Arc<crate::session::Session>,
    mut outbound_rx: tokio::sync::broadcast::Receiver<ServerMessage>,
) {
    let session_id = session.id.clone();
    let (mut sink, mut stream) = socket.split();

    let writer_session_id = session_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Ok(message) = outbound_rx.recv().await {
            if sink.send(Message::Text(message.into_text())).await.is_err() {
                break;
            }
        }
        tracing::debug!(session_id = %writer_session_id, "outbound writer task stopped");
    });

    let reader_session = session;
    let reader_session_id = session_id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Binary(bytes) => reader_session.ingest_binary(&bytes),
                Message::Text(text) => {
                    if reader_session.ingest_json(&text) == IngestOutcome::Close {
                        break;
                    }
                }
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Close(_) => break,
            }
        }
        tracing::debug!(session_id = %reader_session_id, "inbound reader task stopped");
    });

    // Either task finishing ends the connection; abort the other so a
    // half-closed socket doesn't linger.
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    state.remove_session(&session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ClientStatus;

    #[test]
    fn server_message_round_trips_through_into_text() {
        let msg = ServerMessage::StatusUpdate { state: ClientStatus::Idle, utterance_id: None };
        let text = msg.into_text();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "status_update");
    }
}

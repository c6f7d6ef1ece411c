//! Spectating: the read-only socket and the live-games listing.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::debug;

use bitbattle_shared::{RoomCode, ServerEvent};

use crate::api::AppState;
use crate::error::ServerError;
use crate::room::Phase;

#[derive(Debug, Deserialize)]
pub struct SpectateParams {
    room: Option<String>,
}

/// `GET /ws/spectate?room=<code>` -- read-only event stream for a room.
pub async fn spectate_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<SpectateParams>,
) -> Result<impl IntoResponse, ServerError> {
    let room = params
        .room
        .as_deref()
        .ok_or_else(|| ServerError::BadRequest("room query parameter is required".into()))?;
    let code = RoomCode::parse(room)?;

    Ok(ws.on_upgrade(move |socket| handle_spectator(socket, state, code)))
}

async fn handle_spectator(socket: WebSocket, state: AppState, code: RoomCode) {
    let (mut sender, mut receiver) = socket.split();

    let Some(room) = state.rooms.get(code.as_str()).await else {
        let frame = ServerEvent::Error {
            message: "Room not found".to_string(),
            code: "NOT_FOUND".to_string(),
        };
        let _ = sender.send(Message::Text(frame.to_json().into())).await;
        let _ = sender.close().await;
        return;
    };

    let queue = crate::room::OutboundQueue::new(state.config.outbound_queue_capacity);
    let Some(conn_id) = room.spectate(queue.clone()).await else {
        let _ = sender.close().await;
        return;
    };
    debug!(room = %code, conn_id, "spectator attached");

    // Spectators receive the stream but cannot emit game events; inbound
    // traffic is ignored until the peer closes.
    loop {
        tokio::select! {
            maybe_event = queue.pop() => {
                match maybe_event {
                    Some(event) => {
                        if sender.send(Message::Text(event.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_msg = receiver.next() => {
                match maybe_msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    room.leave(conn_id).await;
    queue.close().await;
    let _ = sender.close().await;
    debug!(room = %code, conn_id, "spectator detached");
}

/// `GET /rooms/live` -- every room currently playing (or just finished,
/// still within its grace period).
pub async fn live_rooms_handler(State(state): State<AppState>) -> impl IntoResponse {
    let live_games: Vec<_> = state
        .rooms
        .snapshots()
        .await
        .into_iter()
        .filter(|snapshot| snapshot.phase >= Phase::Playing)
        .map(|snapshot| {
            serde_json::json!({
                "room_id": snapshot.code,
                "players": snapshot.players,
                "player_count": snapshot.players.len(),
                "spectator_count": snapshot.spectator_count,
                "game_mode": snapshot.mode,
                "problem": snapshot.problem.as_ref().map(|p| serde_json::json!({
                    "title": p.title,
                    "difficulty": p.difficulty,
                })),
                "game_ended": snapshot.phase == Phase::Ended,
                "elapsed_seconds": snapshot.created_at.elapsed().as_secs(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "total": live_games.len(),
        "live_games": live_games,
    }))
}

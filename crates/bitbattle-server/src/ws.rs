//! The participant WebSocket: `GET /ws?room=<code>&difficulty=<d>&players=<n>&mode=<m>`.
//!
//! One task per socket. Outbound frames come from the room actor through
//! the socket's [`OutboundQueue`]; inbound frames are parsed, rate-limited
//! and forwarded as room commands. The first frame must be `user_joined`
//! announcing the username -- admission is decided by the room actor.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info};

use bitbattle_shared::{validate, ClientEvent, DifficultyFilter, GameMode, RoomCode, ServerEvent};

use crate::api::AppState;
use crate::auth;
use crate::error::ServerError;
use crate::rate_limit::TokenBucket;
use crate::room::{JoinOutcome, OutboundQueue, RoomHandle};

/// How long a fresh socket may idle before announcing its username.
const JOIN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    room: Option<String>,
    difficulty: Option<String>,
    players: Option<usize>,
    mode: Option<String>,
    /// Optional access token; sockets without one play as guests.
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Result<impl IntoResponse, ServerError> {
    let room = params
        .room
        .as_deref()
        .ok_or_else(|| ServerError::BadRequest("room query parameter is required".into()))?;
    let code = RoomCode::parse(room)?;

    let difficulty = match params.difficulty.as_deref() {
        Some(raw) => raw.parse::<DifficultyFilter>()?,
        None => DifficultyFilter::Any,
    };
    let required_players = validate::player_count(params.players.unwrap_or(2))?;
    let mode = match params.mode.as_deref() {
        Some(raw) => raw.parse::<GameMode>()?,
        None => GameMode::Casual,
    };
    let auth_user = params
        .token
        .as_deref()
        .and_then(|token| auth::verify_access(token, &state.config.jwt_secret).ok());

    Ok(ws.on_upgrade(move |socket| {
        handle_socket(
            socket,
            state,
            code,
            difficulty,
            required_players,
            mode,
            auth_user,
        )
    }))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    code: RoomCode,
    difficulty: DifficultyFilter,
    required_players: usize,
    mode: GameMode,
    auth_user: Option<auth::AuthUser>,
) {
    let (mut sender, mut receiver) = socket.split();

    let room = state
        .rooms
        .get_or_create(code.clone(), difficulty, required_players, mode)
        .await;

    let Some(username) = await_join(&mut sender, &mut receiver).await else {
        let _ = sender.close().await;
        return;
    };

    let queue = OutboundQueue::new(state.config.outbound_queue_capacity);
    let outcome = room
        .join(
            username.clone(),
            auth_user.as_ref().map(|u| u.user_id),
            queue.clone(),
        )
        .await;

    let (conn_id, is_participant) = match outcome {
        Some(JoinOutcome::Participant { conn_id }) => (conn_id, true),
        Some(JoinOutcome::Spectator { conn_id }) => (conn_id, false),
        Some(JoinOutcome::Rejected { .. }) => {
            let frame = ServerEvent::RoomFull {
                message: "This room is full. The game has already started.".to_string(),
            };
            let _ = sender.send(Message::Text(frame.to_json().into())).await;
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: 1000,
                    reason: "room full".into(),
                })))
                .await;
            return;
        }
        None => {
            let frame = ServerEvent::Error {
                message: "Room no longer exists".to_string(),
                code: "ROOM_GONE".to_string(),
            };
            let _ = sender.send(Message::Text(frame.to_json().into())).await;
            let _ = sender.close().await;
            return;
        }
    };

    info!(room = %code, username = %username, is_participant, "socket attached to room");
    pump(
        &state, &room, &queue, conn_id, &username, is_participant, sender, receiver,
    )
    .await;

    room.leave(conn_id).await;
    queue.close().await;
    debug!(room = %code, username = %username, "socket detached");
}

/// Wait for the opening `user_joined` frame and return the validated
/// username. Invalid frames get an `error` response and the socket stays
/// open; a close, transport error or deadline ends the attempt.
async fn await_join(
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
) -> Option<String> {
    let handshake = tokio::time::timeout(JOIN_DEADLINE, async {
        while let Some(message) = receiver.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            };

            match serde_json::from_str::<ClientEvent>(&text) {
                Ok(ClientEvent::UserJoined { username }) => {
                    match validate::username(&username) {
                        Ok(name) => return Some(name.to_string()),
                        Err(e) => {
                            let frame = ServerEvent::Error {
                                message: e.to_string(),
                                code: "INVALID_USERNAME".to_string(),
                            };
                            let _ = sender.send(Message::Text(frame.to_json().into())).await;
                        }
                    }
                }
                Ok(_) => {
                    let frame = ServerEvent::Error {
                        message: "send user_joined first".to_string(),
                        code: "NOT_JOINED".to_string(),
                    };
                    let _ = sender.send(Message::Text(frame.to_json().into())).await;
                }
                Err(_) => {
                    let frame = ServerEvent::Error {
                        message: "unknown or malformed frame".to_string(),
                        code: "CLIENT_INPUT".to_string(),
                    };
                    let _ = sender.send(Message::Text(frame.to_json().into())).await;
                }
            }
        }
        None
    })
    .await;

    handshake.ok().flatten()
}

/// The steady-state loop: drain the outbound queue into the socket and feed
/// inbound frames to the room, until either side goes away.
#[allow(clippy::too_many_arguments)]
async fn pump(
    state: &AppState,
    room: &RoomHandle,
    queue: &OutboundQueue,
    conn_id: u64,
    username: &str,
    is_participant: bool,
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
) {
    let rate = state.config.code_change_rate;
    let mut code_change_bucket = TokenBucket::new(rate);

    loop {
        tokio::select! {
            maybe_event = queue.pop() => {
                match maybe_event {
                    Some(event) => {
                        if sender.send(Message::Text(event.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                    // Force-closed by backpressure, or the room shut us down.
                    None => break,
                }
            }
            maybe_msg = receiver.next() => {
                let text = match maybe_msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(username, error = %e, "socket read error");
                        break;
                    }
                };

                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(ClientEvent::CodeChange { code, timestamp, .. }) => {
                        if !is_participant {
                            continue;
                        }
                        if validate::code(&code).is_err() {
                            continue;
                        }
                        if !code_change_bucket.try_consume(rate, rate) {
                            debug!(username, "code_change rate limited");
                            continue;
                        }
                        // The server-side identity wins over whatever name
                        // the client put in the frame.
                        room.code_change(conn_id, code, timestamp).await;
                    }
                    Ok(ClientEvent::UserLeft { .. }) => break,
                    Ok(ClientEvent::UserJoined { .. }) => {}
                    Err(_) => {
                        let frame = ServerEvent::Error {
                            message: "unknown or malformed frame".to_string(),
                            code: "CLIENT_INPUT".to_string(),
                        };
                        if sender.send(Message::Text(frame.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    let _ = sender.close().await;
}

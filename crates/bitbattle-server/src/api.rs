//! HTTP surface: submission, matchmaking, problems, profiles, the auth
//! refresh exchange, and health probes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use bitbattle_shared::{
    validate, Difficulty, DifficultyFilter, GameMode, Language, PublicProblem, RoomCode,
    SubmissionResult,
};
use bitbattle_store::{Database, GameResult, StoreError, User, UserStats};

use crate::auth::{self, OptionalAuthUser};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::matchmaking::{Matchmaker, QueueStatus};
use crate::pipeline::Pipeline;
use crate::problems::ProblemRepository;
use crate::rate_limit::{rate_limit_middleware, RateLimiters};
use crate::room::{Phase, RoomRegistry};
use crate::{spectate, ws};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<Mutex<Database>>,
    pub rooms: RoomRegistry,
    pub problems: Arc<ProblemRepository>,
    pub pipeline: Arc<Pipeline>,
    pub matchmaker: Arc<Matchmaker>,
}

pub fn build_router(state: AppState, limiters: &RateLimiters) -> Router {
    let cors = match state.config.frontend_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new().allow_origin(AllowOrigin::exact(origin)),
        Err(_) => {
            warn!(
                origin = %state.config.frontend_origin,
                "FRONTEND_ORIGIN is not a valid origin, allowing any"
            );
            CorsLayer::new().allow_origin(Any)
        }
    }
    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
    .allow_headers([
        HeaderName::from_static("content-type"),
        HeaderName::from_static("authorization"),
    ]);

    let submit_routes = Router::new()
        .route("/submit", post(submit_handler))
        .layer(middleware::from_fn_with_state(
            limiters.submit.clone(),
            rate_limit_middleware,
        ));

    let matchmaking_routes = Router::new()
        .route("/matchmaking/join", post(matchmaking_join))
        .route("/matchmaking/leave", post(matchmaking_leave))
        .route("/matchmaking/status", get(matchmaking_status))
        .layer(middleware::from_fn_with_state(
            limiters.matchmaking.clone(),
            rate_limit_middleware,
        ));

    let general_routes = Router::new()
        .route("/", get(root_handler))
        .route("/problems", get(list_problems))
        .route("/problems/{id}", get(get_problem))
        .route("/users/{id}/profile", get(user_profile))
        .route("/users/{id}/history", get(user_history))
        .route("/auth/refresh", post(refresh_access_token))
        .route("/auth/logout", post(logout))
        .route("/auth/logout-all", post(logout_all))
        .layer(middleware::from_fn_with_state(
            limiters.general.clone(),
            rate_limit_middleware,
        ));

    let health_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler));

    let ws_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/ws/spectate", get(spectate::spectate_ws_handler))
        .route("/rooms/live", get(spectate::live_rooms_handler));

    Router::new()
        .merge(health_routes)
        .merge(submit_routes)
        .merge(matchmaking_routes)
        .merge(general_routes)
        .merge(ws_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run store work on the blocking pool; the store mutex is only ever taken
/// from there.
pub async fn with_store<T, F>(store: &Arc<Mutex<Database>>, f: F) -> ServerResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Database) -> Result<T, StoreError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || {
        let mut db = store.blocking_lock();
        f(&mut db)
    })
    .await
    .map_err(|e| ServerError::Internal(format!("store task failed: {e}")))?
    .map_err(ServerError::from)
}

/// Pair whoever can be paired and spin up the rooms for them. Called by the
/// matchmaker tick and opportunistically after every join.
pub async fn drive_matchmaking(state: &AppState) {
    for produced in state.matchmaker.try_match().await {
        state
            .rooms
            .get_or_create(
                produced.room_code,
                produced.difficulty.into(),
                2,
                produced.mode,
            )
            .await;
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    username: String,
    problem_id: String,
    code: String,
    language: String,
    room_id: Option<String>,
}

async fn submit_handler(
    State(state): State<AppState>,
    OptionalAuthUser(auth_user): OptionalAuthUser,
    Json(request): Json<SubmitRequest>,
) -> ServerResult<Json<SubmissionResult>> {
    let username = validate::username(&request.username)?.to_string();
    validate::code(&request.code)?;
    let language: Language = request.language.parse()?;

    let problem = state
        .problems
        .get(&request.problem_id)
        .ok_or(ServerError::NotFound("problem"))?;

    let room = match request.room_id.as_deref() {
        Some(raw) => {
            let code = RoomCode::parse(raw)?;
            let room = state
                .rooms
                .get(code.as_str())
                .await
                .ok_or(ServerError::NotFound("room"))?;
            if room.phase().await != Some(Phase::Playing) {
                return Err(ServerError::RoomNotPlaying);
            }
            Some(room)
        }
        None => None,
    };

    info!(
        username = %username,
        problem = %request.problem_id,
        language = %language,
        authenticated = auth_user.is_some(),
        "code submission received"
    );

    let result = state
        .pipeline
        .submit(
            &username,
            request.room_id.as_deref(),
            problem,
            language,
            &request.code,
        )
        .await;

    // The room actor owns the winner decision; a submitter who already
    // disconnected still ends the game for everyone else.
    if let Some(room) = room {
        room.submission_observed(username, language, result.clone())
            .await;
    }

    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// Matchmaking
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct JoinQueueRequest {
    username: String,
    difficulty: DifficultyFilter,
    game_mode: GameMode,
    connection_id: String,
}

#[derive(Debug, Serialize)]
pub struct JoinQueueResponse {
    success: bool,
    message: String,
    queue_size: usize,
}

async fn matchmaking_join(
    State(state): State<AppState>,
    OptionalAuthUser(auth_user): OptionalAuthUser,
    Json(request): Json<JoinQueueRequest>,
) -> ServerResult<Json<JoinQueueResponse>> {
    let username = validate::username(&request.username)?.to_string();
    let connection_id = validate::connection_id(&request.connection_id)?.to_string();

    if request.game_mode == GameMode::Ranked && auth_user.is_none() {
        return Err(ServerError::Unauthorized(
            "authentication required for ranked matchmaking".to_string(),
        ));
    }

    let queue_size = state
        .matchmaker
        .join(&connection_id, &username, request.difficulty, request.game_mode)
        .await;
    info!(username = %username, queue_size, "player joined matchmaking queue");

    drive_matchmaking(&state).await;

    Ok(Json(JoinQueueResponse {
        success: true,
        message: "Added to matchmaking queue".to_string(),
        queue_size,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LeaveQueueRequest {
    connection_id: String,
}

#[derive(Debug, Serialize)]
pub struct LeaveQueueResponse {
    success: bool,
    message: String,
}

async fn matchmaking_leave(
    State(state): State<AppState>,
    Json(request): Json<LeaveQueueRequest>,
) -> ServerResult<Json<LeaveQueueResponse>> {
    let connection_id = validate::connection_id(&request.connection_id)?;
    let removed = state.matchmaker.leave(connection_id).await;

    Ok(Json(LeaveQueueResponse {
        success: removed,
        message: if removed {
            "Removed from matchmaking queue".to_string()
        } else {
            "Not found in queue".to_string()
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    connection_id: Option<String>,
}

async fn matchmaking_status(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> ServerResult<Json<QueueStatus>> {
    let connection_id = validate::connection_id(params.connection_id.as_deref().unwrap_or(""))?;
    Ok(Json(state.matchmaker.status(connection_id).await))
}

// ---------------------------------------------------------------------------
// Problems
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ProblemSummary {
    id: String,
    title: String,
    difficulty: Difficulty,
    tags: Vec<String>,
}

async fn list_problems(State(state): State<AppState>) -> Json<Vec<ProblemSummary>> {
    let problems = state
        .problems
        .iter()
        .map(|p| ProblemSummary {
            id: p.id.clone(),
            title: p.title.clone(),
            difficulty: p.difficulty,
            tags: p.tags.clone(),
        })
        .collect();
    Json(problems)
}

async fn get_problem(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<PublicProblem>> {
    state
        .problems
        .get(&id)
        .map(|p| Json(p.public()))
        .ok_or(ServerError::NotFound("problem"))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ProfileResponse {
    user: User,
    stats: UserStats,
}

async fn user_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ServerResult<Json<ProfileResponse>> {
    let (user, stats) = with_store(&state.store, move |db| {
        let user = db.get_user(id)?;
        let stats = db.get_stats(id)?;
        Ok((user, stats))
    })
    .await?;

    match (user, stats) {
        (Some(user), Some(stats)) => Ok(Json(ProfileResponse { user, stats })),
        _ => Err(ServerError::NotFound("user")),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<u32>,
}

async fn user_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> ServerResult<Json<Vec<GameResult>>> {
    let limit = params.limit.unwrap_or(20).min(100);
    let history = with_store(&state.store, move |db| db.game_history(id, limit)).await?;
    Ok(Json(history))
}

// ---------------------------------------------------------------------------
// Auth refresh exchange
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    access_token: String,
    expires_in_seconds: i64,
}

async fn refresh_access_token(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> ServerResult<Json<RefreshResponse>> {
    let claims = auth::validate_refresh_token(&request.refresh_token, &state.config.jwt_secret)?;

    let jti = claims.jti;
    let user_id = claims.sub;
    let (token, user) = with_store(&state.store, move |db| {
        Ok((db.get_refresh_token(jti)?, db.get_user(user_id)?))
    })
    .await?;

    let now = Utc::now();
    let valid = token.map(|t| t.is_valid(now)).unwrap_or(false);
    let user = match (valid, user) {
        (true, Some(user)) => user,
        _ => {
            return Err(ServerError::Unauthorized(
                "refresh token revoked or expired".to_string(),
            ))
        }
    };

    let access_token = auth::create_access_token(
        user.id,
        &user.display_name,
        &state.config.jwt_secret,
    )
    .map_err(|e| ServerError::Internal(format!("failed to sign token: {e}")))?;

    Ok(Json(RefreshResponse {
        access_token,
        expires_in_seconds: 15 * 60,
    }))
}

/// Revoke one refresh token (log this session out).
async fn logout(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> ServerResult<Json<serde_json::Value>> {
    let claims = auth::validate_refresh_token(&request.refresh_token, &state.config.jwt_secret)?;
    let jti = claims.jti;
    let revoked = with_store(&state.store, move |db| db.revoke_refresh_token(jti)).await?;
    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

/// Revoke every refresh token of the authenticated user.
async fn logout_all(
    State(state): State<AppState>,
    user: auth::AuthUser,
) -> ServerResult<Json<serde_json::Value>> {
    let user_id = user.user_id;
    let revoked = with_store(&state.store, move |db| db.revoke_all_refresh_tokens(user_id)).await?;
    info!(user = %user_id, revoked, "all sessions revoked");
    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn root_handler() -> &'static str {
    "BitBattle backend is running"
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn ready_handler(State(state): State<AppState>) -> ServerResult<Json<serde_json::Value>> {
    with_store(&state.store, |db| {
        db.conn()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(StoreError::from)
    })
    .await?;

    Ok(Json(serde_json::json!({
        "status": "ready",
        "database": "connected",
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

//! Swarm API Routes
//!
//! This module contains all routes for the dispatch engine:
//! - Request dispatch
//! - Session inspection and cancellation
//! - Signal resolution
//! - Agent definition CRUD
//! - Engine configuration
//! - Live progress streaming

pub mod agents;
pub mod config;
pub mod stream;

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::bee_handover::BeeHandover;
use db::models::bee_run::BeeRun;
use db::models::bee_signal::BeeSignal;
use db::models::swarm_session::SwarmSession;
use serde::Serialize;
use services::services::swarm::{DispatchOutcome, DispatchRequest};
use ts_rs::TS;
use uuid::Uuid;

use crate::{AppState, error::ApiError, response::ApiResponse};

/// Path params struct for routes with only session_id
#[derive(Debug, serde::Deserialize)]
struct SessionIdPath {
    session_id: Uuid,
}

/// Path params struct for routes with session_id and signal_id
#[derive(Debug, serde::Deserialize)]
struct SessionSignalPath {
    session_id: Uuid,
    #[allow(dead_code)]
    signal_id: Uuid,
}

/// Middleware to load the session from the path parameter
async fn load_session_middleware(
    State(state): State<AppState>,
    Path(params): Path<SessionIdPath>,
    mut request: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, ApiError> {
    let session = SwarmSession::find_by_id(&state.db_pool, params.session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Swarm session not found".to_string()))?;

    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

/// Middleware variant for routes nested one level deeper (signal routes)
async fn load_session_middleware_with_signal(
    State(state): State<AppState>,
    Path(params): Path<SessionSignalPath>,
    mut request: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, ApiError> {
    let session = SwarmSession::find_by_id(&state.db_pool, params.session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Swarm session not found".to_string()))?;

    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

// ============================================================================
// Dispatch Handlers
// ============================================================================

/// POST /api/swarm/dispatch - Route an incoming request
pub async fn dispatch(
    State(state): State<AppState>,
    Json(payload): Json<DispatchRequest>,
) -> Result<ResponseJson<ApiResponse<DispatchOutcome>>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message must not be empty".to_string()));
    }
    if payload.message.len() > 10_000 {
        return Err(ApiError::BadRequest(
            "Message too long (max 10000 chars)".to_string(),
        ));
    }

    let outcome = state.dispatch.dispatch(&payload).await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

// ============================================================================
// Session Handlers
// ============================================================================

/// GET /api/swarm/sessions - List all sessions
pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<SwarmSession>>>, ApiError> {
    let sessions = SwarmSession::find_all(&state.db_pool).await?;
    Ok(ResponseJson(ApiResponse::success(sessions)))
}

/// GET /api/swarm/sessions/:id - Get a specific session
pub async fn get_session(
    Extension(session): Extension<SwarmSession>,
) -> Result<ResponseJson<ApiResponse<SwarmSession>>, ApiError> {
    Ok(ResponseJson(ApiResponse::success(session)))
}

/// GET /api/swarm/sessions/:id/runs - Runs for a session, in phase order
pub async fn list_runs(
    Extension(session): Extension<SwarmSession>,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<BeeRun>>>, ApiError> {
    let runs = BeeRun::find_by_session_id(&state.db_pool, session.id).await?;
    Ok(ResponseJson(ApiResponse::success(runs)))
}

/// GET /api/swarm/sessions/:id/signals - Signals raised by a session
pub async fn list_signals(
    Extension(session): Extension<SwarmSession>,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<BeeSignal>>>, ApiError> {
    let signals = BeeSignal::find_by_session_id(&state.db_pool, session.id).await?;
    Ok(ResponseJson(ApiResponse::success(signals)))
}

/// GET /api/swarm/sessions/:id/handovers - Handovers recorded for a session
pub async fn list_handovers(
    Extension(session): Extension<SwarmSession>,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<BeeHandover>>>, ApiError> {
    let handovers = BeeHandover::find_by_session_id(&state.db_pool, session.id).await?;
    Ok(ResponseJson(ApiResponse::success(handovers)))
}

#[derive(Debug, Serialize, TS)]
pub struct CancelResponse {
    /// Whether this request newly set the cancellation flag. False means the
    /// session had already reached a terminal state.
    pub cancelled: bool,
}

/// POST /api/swarm/sessions/:id/cancel - Request cancellation
pub async fn cancel_session(
    Extension(session): Extension<SwarmSession>,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<CancelResponse>>, ApiError> {
    let cancelled = state.dispatch.cancel(session.id).await?;
    Ok(ResponseJson(ApiResponse::success(CancelResponse {
        cancelled,
    })))
}

// ============================================================================
// Signal Handlers
// ============================================================================

#[derive(Debug, Serialize, TS)]
pub struct ResolveResponse {
    pub resolved: bool,
}

/// POST /api/swarm/sessions/:id/signals/:signal_id/resolve - Resolve a signal
pub async fn resolve_signal(
    Extension(session): Extension<SwarmSession>,
    Path(params): Path<SessionSignalPath>,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<ResolveResponse>>, ApiError> {
    state
        .dispatch
        .resolve_signal(session.id, params.signal_id)
        .await?;
    Ok(ResponseJson(ApiResponse::success(ResolveResponse {
        resolved: true,
    })))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: &AppState) -> Router<AppState> {
    // Routes that operate on one session
    let session_router = Router::new()
        .route("/", get(get_session))
        .route("/runs", get(list_runs))
        .route("/signals", get(list_signals))
        .route("/handovers", get(list_handovers))
        .route("/cancel", post(cancel_session))
        .route("/stream", get(stream::session_stream))
        .layer(from_fn_with_state(state.clone(), load_session_middleware));

    let signal_router = Router::new()
        .route("/resolve", post(resolve_signal))
        .layer(from_fn_with_state(
            state.clone(),
            load_session_middleware_with_signal,
        ));

    let sessions_router = Router::new()
        .route("/", get(list_sessions))
        .nest("/{session_id}", session_router)
        .nest("/{session_id}/signals/{signal_id}", signal_router);

    Router::new()
        .nest(
            "/swarm",
            Router::new()
                .route("/dispatch", post(dispatch))
                .nest("/sessions", sessions_router),
        )
        .merge(agents::router())
        .merge(config::router())
}

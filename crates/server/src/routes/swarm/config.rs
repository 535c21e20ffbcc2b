//! Engine Configuration Routes

use axum::{
    Json, Router,
    extract::State,
    response::Json as ResponseJson,
    routing::get,
};
use db::models::swarm_config::{SwarmConfig, UpdateSwarmConfig};

use crate::{AppState, error::ApiError, response::ApiResponse};

pub async fn get_config(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<SwarmConfig>>, ApiError> {
    let config = SwarmConfig::get(&state.db_pool).await?;
    Ok(ResponseJson(ApiResponse::success(config)))
}

pub async fn update_config(
    State(state): State<AppState>,
    Json(payload): Json<UpdateSwarmConfig>,
) -> Result<ResponseJson<ApiResponse<SwarmConfig>>, ApiError> {
    if let Some(timeout) = payload.hold_timeout_seconds {
        if timeout < 0 {
            return Err(ApiError::BadRequest(
                "Hold timeout must not be negative".to_string(),
            ));
        }
    }
    if let Some(timeout) = payload.model_timeout_seconds {
        if timeout < 1 {
            return Err(ApiError::BadRequest(
                "Model timeout must be at least 1 second".to_string(),
            ));
        }
    }
    if let Some(interval) = payload.signal_poll_interval_ms {
        if interval < 10 {
            return Err(ApiError::BadRequest(
                "Signal poll interval must be at least 10ms".to_string(),
            ));
        }
    }
    if let Some(interval) = payload.stream_poll_interval_ms {
        if interval < 50 {
            return Err(ApiError::BadRequest(
                "Stream poll interval must be at least 50ms".to_string(),
            ));
        }
    }

    let config = SwarmConfig::update(&state.db_pool, &payload).await?;

    tracing::info!("Updated engine configuration");

    Ok(ResponseJson(ApiResponse::success(config)))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/config/swarm", get(get_config).put(update_config))
}

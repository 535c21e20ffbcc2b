//! Agent Definition Routes
//!
//! CRUD over the bee templates the selector draws from. Definitions are
//! configuration: the engine reads them at dispatch time and never writes
//! them itself.

use axum::{
    Json, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::agent_definition::{
    AgentDefinition, CreateAgentDefinition, UpdateAgentDefinition,
};
use serde::Serialize;
use ts_rs::TS;
use uuid::Uuid;

use crate::{AppState, error::ApiError, response::ApiResponse};

/// GET /api/agents - List all agent definitions
pub async fn list_agents(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<AgentDefinition>>>, ApiError> {
    let agents = AgentDefinition::find_all(&state.db_pool).await?;
    Ok(ResponseJson(ApiResponse::success(agents)))
}

/// POST /api/agents - Create a new agent definition
pub async fn create_agent(
    State(state): State<AppState>,
    Json(payload): Json<CreateAgentDefinition>,
) -> Result<ResponseJson<ApiResponse<AgentDefinition>>, ApiError> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Name must not be empty".to_string()));
    }
    if payload.name.len() > 255 {
        return Err(ApiError::BadRequest(
            "Name too long (max 255 chars)".to_string(),
        ));
    }

    let agent = AgentDefinition::create(&state.db_pool, &payload, Uuid::new_v4()).await?;

    tracing::info!(agent_id = %agent.id, name = %agent.name, "Created agent definition");

    Ok(ResponseJson(ApiResponse::success(agent)))
}

/// GET /api/agents/:id - Get a specific agent definition
pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<AgentDefinition>>, ApiError> {
    let agent = AgentDefinition::find_by_id(&state.db_pool, agent_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Agent definition not found".to_string()))?;
    Ok(ResponseJson(ApiResponse::success(agent)))
}

/// PUT /api/agents/:id - Update an agent definition
pub async fn update_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    Json(payload): Json<UpdateAgentDefinition>,
) -> Result<ResponseJson<ApiResponse<AgentDefinition>>, ApiError> {
    if let Some(ref name) = payload.name {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("Name must not be empty".to_string()));
        }
        if name.len() > 255 {
            return Err(ApiError::BadRequest(
                "Name too long (max 255 chars)".to_string(),
            ));
        }
    }

    AgentDefinition::find_by_id(&state.db_pool, agent_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Agent definition not found".to_string()))?;

    let agent = AgentDefinition::update(&state.db_pool, agent_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(agent)))
}

#[derive(Debug, Serialize, TS)]
pub struct DeleteResponse {
    pub deleted: bool,
}

/// DELETE /api/agents/:id - Delete an agent definition
pub async fn delete_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<DeleteResponse>>, ApiError> {
    let rows = AgentDefinition::delete(&state.db_pool, agent_id).await?;
    if rows == 0 {
        return Err(ApiError::NotFound("Agent definition not found".to_string()));
    }

    tracing::info!(agent_id = %agent_id, "Deleted agent definition");

    Ok(ResponseJson(ApiResponse::success(DeleteResponse {
        deleted: true,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agents", get(list_agents).post(create_agent))
        .route(
            "/agents/{agent_id}",
            get(get_agent).put(update_agent).delete(delete_agent),
        )
}

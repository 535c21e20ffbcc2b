//! API error type shared by all route handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

use crate::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Dispatch(#[from] services::services::swarm::DispatchError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use services::services::swarm::DispatchError;

        let (status, message) = match &self {
            ApiError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Dispatch(DispatchError::SessionNotFound(id)) => (
                StatusCode::NOT_FOUND,
                format!("swarm session not found: {id}"),
            ),
            ApiError::Dispatch(DispatchError::Database(e)) => {
                tracing::error!(error = %e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::Dispatch(e) => {
                tracing::error!(error = %e, "Dispatch error");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        (status, Json(ApiResponse::<()>::error(&message))).into_response()
    }
}

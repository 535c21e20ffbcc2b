pub mod swarm;

use axum::Router;

use crate::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new().nest("/api", swarm::router(state))
}

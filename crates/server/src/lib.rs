pub mod error;
pub mod response;
pub mod routes;

use std::sync::Arc;

use services::services::swarm::{ConnectionRegistry, DispatchService, SwarmQueue};
use sqlx::SqlitePool;

/// Application state shared by all routes.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub dispatch: Arc<DispatchService>,
    /// Registry of connected notification clients.
    pub registry: Arc<ConnectionRegistry>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, queue: Arc<dyn SwarmQueue>) -> Self {
        Self {
            dispatch: Arc::new(DispatchService::new(db_pool.clone(), queue)),
            registry: Arc::new(ConnectionRegistry::new()),
            db_pool,
        }
    }

    /// Create with a shared registry, so the executor and the routes see the
    /// same set of connections.
    pub fn with_registry(
        db_pool: SqlitePool,
        queue: Arc<dyn SwarmQueue>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            dispatch: Arc::new(DispatchService::new(db_pool.clone(), queue)),
            registry,
            db_pool,
        }
    }
}

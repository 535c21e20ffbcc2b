use std::sync::Arc;

use anyhow::Context;
use services::services::swarm::{
    ConnectionRegistry, HttpModelInvoker, LocalSwarmQueue, QueueConfig, SwarmExecutor,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use server::{AppState, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let database_path =
        std::env::var("DATABASE_PATH").unwrap_or_else(|_| "swarm_dispatch.db".to_string());
    let options = SqliteConnectOptions::new()
        .filename(&database_path)
        .create_if_missing(true);
    let db_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("Failed to open database")?;

    db::schema::create_all(&db_pool)
        .await
        .context("Failed to create schema")?;

    let model_url =
        std::env::var("MODEL_API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let model_key = std::env::var("MODEL_API_KEY").ok();
    let model = Arc::new(HttpModelInvoker::new(model_url, model_key)?);

    let registry = Arc::new(ConnectionRegistry::new());
    let executor = Arc::new(SwarmExecutor::new(
        db_pool.clone(),
        model,
        registry.clone(),
    ));
    let queue_config = QueueConfig::load(&db_pool).await;
    let queue = Arc::new(LocalSwarmQueue::new(executor, queue_config));

    let state = AppState::with_registry(db_pool, queue, registry);
    let app = routes::router(&state)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:3400".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!(addr = %addr, "Swarm dispatch engine listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

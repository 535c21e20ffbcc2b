//! SQLite schema bootstrap.
//!
//! The server creates these tables at startup and the test suites create them
//! against `sqlite::memory:`, so the DDL lives in one place.

use sqlx::SqlitePool;

/// Create all swarm engine tables plus the default config row.
///
/// Idempotent: every statement uses IF NOT EXISTS / INSERT OR IGNORE.
pub async fn create_all(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS swarm_sessions (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'running' CHECK (status IN ('running', 'completed', 'failed', 'cancelled')),
            trigger_message TEXT NOT NULL,
            hive_context TEXT NOT NULL DEFAULT '[]',
            result TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bee_runs (
            id TEXT PRIMARY KEY,
            swarm_session_id TEXT NOT NULL REFERENCES swarm_sessions(id) ON DELETE CASCADE,
            phase INTEGER NOT NULL,
            bee_type TEXT NOT NULL CHECK (bee_type IN ('assistant', 'admin', 'manager', 'operator')),
            template_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'running' CHECK (status IN ('running', 'waiting_signal', 'waiting_handover', 'completed', 'failed')),
            status_text TEXT,
            output TEXT,
            duration_ms INTEGER,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bee_signals (
            id TEXT PRIMARY KEY,
            swarm_session_id TEXT NOT NULL REFERENCES swarm_sessions(id) ON DELETE CASCADE,
            bee_run_id TEXT NOT NULL REFERENCES bee_runs(id) ON DELETE CASCADE,
            signal_type TEXT NOT NULL CHECK (signal_type IN ('hold', 'info', 'warning', 'escalate')),
            message TEXT NOT NULL,
            is_resolved INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            resolved_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bee_handovers (
            id TEXT PRIMARY KEY,
            swarm_session_id TEXT NOT NULL REFERENCES swarm_sessions(id) ON DELETE CASCADE,
            from_bee_run_id TEXT NOT NULL REFERENCES bee_runs(id) ON DELETE CASCADE,
            to_bee_run_id TEXT NOT NULL REFERENCES bee_runs(id) ON DELETE CASCADE,
            summary TEXT NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agent_definitions (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            bee_type TEXT NOT NULL CHECK (bee_type IN ('assistant', 'admin', 'manager', 'operator')),
            bee_subtype TEXT NOT NULL DEFAULT 'none' CHECK (bee_subtype IN ('none', 'orchestrator', 'coordinator', 'specialist', 'analyst', 'compliance')),
            trigger_conditions TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS swarm_config (
            id TEXT PRIMARY KEY DEFAULT 'default',
            hold_timeout_seconds INTEGER DEFAULT 300,
            model_timeout_seconds INTEGER DEFAULT 120,
            signal_poll_interval_ms INTEGER DEFAULT 1000,
            stream_poll_interval_ms INTEGER DEFAULT 500,
            queue_max_retries INTEGER DEFAULT 3,
            queue_base_delay_ms INTEGER DEFAULT 5000,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO swarm_config (id) VALUES ('default')")
        .execute(pool)
        .await?;

    Ok(())
}

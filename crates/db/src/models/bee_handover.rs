use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

/// Context passed from one phase's run to a run in a later phase.
/// Read-only once created; `from` always has a strictly lower phase than `to`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct BeeHandover {
    pub id: Uuid,
    pub swarm_session_id: Uuid,
    pub from_bee_run_id: Uuid,
    pub to_bee_run_id: Uuid,
    pub summary: String,
    #[ts(type = "Date")]
    pub created_at: DateTime<Utc>,
}

impl BeeHandover {
    fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            swarm_session_id: row.try_get("swarm_session_id")?,
            from_bee_run_id: row.try_get("from_bee_run_id")?,
            to_bee_run_id: row.try_get("to_bee_run_id")?,
            summary: row.try_get("summary")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub async fn find_by_session_id(
        pool: &SqlitePool,
        session_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, swarm_session_id, from_bee_run_id, to_bee_run_id, summary, created_at
             FROM bee_handovers
             WHERE swarm_session_id = $1
             ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(Self::from_row).collect()
    }

    pub async fn create(
        pool: &SqlitePool,
        session_id: Uuid,
        from_bee_run_id: Uuid,
        to_bee_run_id: Uuid,
        summary: &str,
        handover_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let row = sqlx::query(
            "INSERT INTO bee_handovers (id, swarm_session_id, from_bee_run_id, to_bee_run_id, summary)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, swarm_session_id, from_bee_run_id, to_bee_run_id, summary, created_at",
        )
        .bind(handover_id)
        .bind(session_id)
        .bind(from_bee_run_id)
        .bind(to_bee_run_id)
        .bind(summary)
        .fetch_one(pool)
        .await?;

        Self::from_row(row)
    }
}

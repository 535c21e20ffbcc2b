use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::agent_definition::BeeType;

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default)]
#[sqlx(type_name = "bee_run_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BeeRunStatus {
    #[default]
    Running,
    WaitingSignal,
    WaitingHandover,
    Completed,
    Failed,
}

impl BeeRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One agent's execution within a session. Created when its phase starts,
/// append-only afterwards: only the status, status text, output and duration
/// ever change.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct BeeRun {
    pub id: Uuid,
    pub swarm_session_id: Uuid,
    /// The phase number from the dispatch plan (`DispatchBee.order`).
    pub phase: i64,
    pub bee_type: BeeType,
    pub template_name: String,
    pub status: BeeRunStatus,
    pub status_text: Option<String>,
    pub output: Option<String>,
    pub duration_ms: Option<i64>,
    #[ts(type = "Date")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "Date")]
    pub updated_at: DateTime<Utc>,
}

impl BeeRun {
    fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let status_str: String = row.try_get("status")?;
        let status = status_str.parse::<BeeRunStatus>().unwrap_or_default();

        let type_str: String = row.try_get("bee_type")?;
        let bee_type = type_str.parse::<BeeType>().unwrap_or_default();

        Ok(Self {
            id: row.try_get("id")?,
            swarm_session_id: row.try_get("swarm_session_id")?,
            phase: row.try_get("phase")?,
            bee_type,
            template_name: row.try_get("template_name")?,
            status,
            status_text: row.try_get("status_text")?,
            output: row.try_get("output")?,
            duration_ms: row.try_get("duration_ms")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, swarm_session_id, phase, bee_type, template_name, status,
                    status_text, output, duration_ms, created_at, updated_at
             FROM bee_runs
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        row.map(Self::from_row).transpose()
    }

    /// All runs for a session in execution order (phase, then creation time).
    pub async fn find_by_session_id(
        pool: &SqlitePool,
        session_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, swarm_session_id, phase, bee_type, template_name, status,
                    status_text, output, duration_ms, created_at, updated_at
             FROM bee_runs
             WHERE swarm_session_id = $1
             ORDER BY phase ASC, created_at ASC",
        )
        .bind(session_id)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(Self::from_row).collect()
    }

    pub async fn create(
        pool: &SqlitePool,
        session_id: Uuid,
        phase: i64,
        bee_type: BeeType,
        template_name: &str,
        run_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let row = sqlx::query(
            "INSERT INTO bee_runs (id, swarm_session_id, phase, bee_type, template_name)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, swarm_session_id, phase, bee_type, template_name, status,
                       status_text, output, duration_ms, created_at, updated_at",
        )
        .bind(run_id)
        .bind(session_id)
        .bind(phase)
        .bind(bee_type.to_string())
        .bind(template_name)
        .fetch_one(pool)
        .await?;

        Self::from_row(row)
    }

    pub async fn update_status(
        pool: &SqlitePool,
        id: Uuid,
        status: BeeRunStatus,
        status_text: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE bee_runs
             SET status = $2, status_text = $3, updated_at = CURRENT_TIMESTAMP
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.to_string())
        .bind(status_text)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// A run finished producing output. It parks in `waiting_handover` until
    /// the next phase (or synthesis) picks the output up.
    pub async fn park_for_handover(
        pool: &SqlitePool,
        id: Uuid,
        output: &str,
        duration_ms: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE bee_runs
             SET status = 'waiting_handover', output = $2, duration_ms = $3,
                 status_text = NULL, updated_at = CURRENT_TIMESTAMP
             WHERE id = $1",
        )
        .bind(id)
        .bind(output)
        .bind(duration_ms)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn complete_run(
        pool: &SqlitePool,
        id: Uuid,
        output: &str,
        duration_ms: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE bee_runs
             SET status = 'completed', output = $2, duration_ms = $3, updated_at = CURRENT_TIMESTAMP
             WHERE id = $1",
        )
        .bind(id)
        .bind(output)
        .bind(duration_ms)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Promote a parked run to completed. Conditional so it never resurrects
    /// a run that already reached a terminal state.
    pub async fn complete_if_waiting(pool: &SqlitePool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE bee_runs
             SET status = 'completed', updated_at = CURRENT_TIMESTAMP
             WHERE id = $1 AND status IN ('waiting_handover', 'waiting_signal', 'running')",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn fail_run(
        pool: &SqlitePool,
        id: Uuid,
        status_text: &str,
        duration_ms: Option<i64>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE bee_runs
             SET status = 'failed', status_text = $2, duration_ms = $3, updated_at = CURRENT_TIMESTAMP
             WHERE id = $1",
        )
        .bind(id)
        .bind(status_text)
        .bind(duration_ms)
        .execute(pool)
        .await?;
        Ok(())
    }
}

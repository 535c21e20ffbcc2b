use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default)]
#[sqlx(type_name = "swarm_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SwarmStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SwarmStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The aggregate root for one orchestration. Created at dispatch time when a
/// request goes to the swarm path; mutated only by the executor afterwards
/// (apart from the cancellation flag).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct SwarmSession {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub status: SwarmStatus,
    pub trigger_message: String,
    /// Accumulated per-phase output summaries, in phase order. Feeds both
    /// the stream's `hive_context_update` events and prompt context when a
    /// re-invoked worker resumes a half-finished session.
    pub hive_context: Vec<String>,
    #[ts(type = "any | null")]
    pub result: Option<serde_json::Value>,
    #[ts(type = "Date")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "Date")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateSwarmSession {
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub trigger_message: String,
}

impl SwarmSession {
    fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let status_str: String = row.try_get("status")?;
        let status = status_str.parse::<SwarmStatus>().unwrap_or_else(|_| {
            tracing::warn!(
                status = %status_str,
                "Invalid swarm session status in database, falling back to default"
            );
            SwarmStatus::default()
        });

        let hive_context: Vec<String> = row
            .try_get::<Option<String>, _>("hive_context")?
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        let result: Option<serde_json::Value> = row
            .try_get::<Option<String>, _>("result")?
            .and_then(|s| serde_json::from_str(&s).ok());

        Ok(Self {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            user_id: row.try_get("user_id")?,
            status,
            trigger_message: row.try_get("trigger_message")?,
            hive_context,
            result,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, org_id, user_id, status, trigger_message, hive_context, result, created_at, updated_at
             FROM swarm_sessions
             ORDER BY created_at DESC",
        )
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(Self::from_row).collect()
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, org_id, user_id, status, trigger_message, hive_context, result, created_at, updated_at
             FROM swarm_sessions
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        row.map(Self::from_row).transpose()
    }

    pub async fn find_by_org_id(pool: &SqlitePool, org_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, org_id, user_id, status, trigger_message, hive_context, result, created_at, updated_at
             FROM swarm_sessions
             WHERE org_id = $1
             ORDER BY created_at DESC",
        )
        .bind(org_id)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(Self::from_row).collect()
    }

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateSwarmSession,
        session_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let row = sqlx::query(
            "INSERT INTO swarm_sessions (id, org_id, user_id, trigger_message)
             VALUES ($1, $2, $3, $4)
             RETURNING id, org_id, user_id, status, trigger_message, hive_context, result, created_at, updated_at",
        )
        .bind(session_id)
        .bind(data.org_id)
        .bind(data.user_id)
        .bind(&data.trigger_message)
        .fetch_one(pool)
        .await?;

        Self::from_row(row)
    }

    /// Finalize a session: terminal status plus the result payload.
    pub async fn finalize(
        pool: &SqlitePool,
        id: Uuid,
        status: SwarmStatus,
        result: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        let result_json =
            serde_json::to_string(result).unwrap_or_else(|_| "null".to_string());
        sqlx::query(
            "UPDATE swarm_sessions
             SET status = $2, result = $3, updated_at = CURRENT_TIMESTAMP
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.to_string())
        .bind(&result_json)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record the cancellation flag. Conditional on the session still being
    /// live, so cancelling a completed/failed session is a no-op. Returns the
    /// number of rows updated (0 means the session was already terminal).
    pub async fn cancel(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE swarm_sessions
             SET status = 'cancelled', updated_at = CURRENT_TIMESTAMP
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn update_hive_context(
        pool: &SqlitePool,
        id: Uuid,
        hive_context: &[String],
    ) -> Result<(), sqlx::Error> {
        let context_json =
            serde_json::to_string(hive_context).unwrap_or_else(|_| "[]".to_string());
        sqlx::query(
            "UPDATE swarm_sessions SET hive_context = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
        )
        .bind(id)
        .bind(&context_json)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM swarm_sessions WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

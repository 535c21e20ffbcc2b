use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default)]
#[sqlx(type_name = "signal_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SignalType {
    Hold,
    #[default]
    Info,
    Warning,
    Escalate,
}

impl SignalType {
    /// Only `hold` blocks the executor; the rest are advisory.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Hold)
    }
}

/// A request for attention raised by an agent mid-execution. Resolved by a
/// human operator (or an automated acknowledgement) via the resolve endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct BeeSignal {
    pub id: Uuid,
    pub swarm_session_id: Uuid,
    pub bee_run_id: Uuid,
    pub signal_type: SignalType,
    pub message: String,
    pub is_resolved: bool,
    #[ts(type = "Date")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "Date | null")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl BeeSignal {
    fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let type_str: String = row.try_get("signal_type")?;
        let signal_type = type_str.parse::<SignalType>().unwrap_or_default();

        let is_resolved: i32 = row.try_get("is_resolved").unwrap_or(0);

        Ok(Self {
            id: row.try_get("id")?,
            swarm_session_id: row.try_get("swarm_session_id")?,
            bee_run_id: row.try_get("bee_run_id")?,
            signal_type,
            message: row.try_get("message")?,
            is_resolved: is_resolved != 0,
            created_at: row.try_get("created_at")?,
            resolved_at: row.try_get("resolved_at")?,
        })
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, swarm_session_id, bee_run_id, signal_type, message, is_resolved,
                    created_at, resolved_at
             FROM bee_signals
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        row.map(Self::from_row).transpose()
    }

    pub async fn find_by_session_id(
        pool: &SqlitePool,
        session_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, swarm_session_id, bee_run_id, signal_type, message, is_resolved,
                    created_at, resolved_at
             FROM bee_signals
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
        bee_run_id: Uuid,
        signal_type: SignalType,
        message: &str,
        signal_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let row = sqlx::query(
            "INSERT INTO bee_signals (id, swarm_session_id, bee_run_id, signal_type, message)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, swarm_session_id, bee_run_id, signal_type, message, is_resolved,
                       created_at, resolved_at",
        )
        .bind(signal_id)
        .bind(session_id)
        .bind(bee_run_id)
        .bind(signal_type.to_string())
        .bind(message)
        .fetch_one(pool)
        .await?;

        Self::from_row(row)
    }

    /// Atomic conditional resolution. Resolving an already-resolved or
    /// nonexistent signal is a no-op, not an error, so duplicate client
    /// clicks stay harmless. Returns the number of rows updated.
    pub async fn resolve(
        pool: &SqlitePool,
        session_id: Uuid,
        signal_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE bee_signals
             SET is_resolved = 1, resolved_at = CURRENT_TIMESTAMP
             WHERE id = $1 AND swarm_session_id = $2 AND is_resolved = 0",
        )
        .bind(signal_id)
        .bind(session_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

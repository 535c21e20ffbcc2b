use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use ts_rs::TS;

/// Engine configuration stored in the database as a singleton row.
///
/// Only runtime knobs live here (timeouts, poll intervals, queue retry
/// policy). Dispatch semantics such as the swarm threshold, the bee cap and
/// the nominal phase duration are code constants.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct SwarmConfig {
    pub id: String,

    /// How long a `hold` signal may block a run before it times out.
    pub hold_timeout_seconds: i64,
    /// Per-invocation model timeout.
    pub model_timeout_seconds: i64,
    /// How often a blocked run re-checks its signal.
    pub signal_poll_interval_ms: i64,
    /// Stream publisher poll-and-diff interval.
    pub stream_poll_interval_ms: i64,

    // Local queue retry policy
    pub queue_max_retries: i32,
    pub queue_base_delay_ms: i64,

    #[ts(type = "Date")]
    pub updated_at: DateTime<Utc>,
}

/// DTO for updating config.
#[derive(Debug, Clone, Deserialize, TS)]
pub struct UpdateSwarmConfig {
    pub hold_timeout_seconds: Option<i64>,
    pub model_timeout_seconds: Option<i64>,
    pub signal_poll_interval_ms: Option<i64>,
    pub stream_poll_interval_ms: Option<i64>,
    pub queue_max_retries: Option<i32>,
    pub queue_base_delay_ms: Option<i64>,
}

impl SwarmConfig {
    fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row
                .try_get::<Option<String>, _>("id")?
                .unwrap_or_else(|| "default".to_string()),
            hold_timeout_seconds: row
                .try_get::<Option<i64>, _>("hold_timeout_seconds")?
                .unwrap_or(300),
            model_timeout_seconds: row
                .try_get::<Option<i64>, _>("model_timeout_seconds")?
                .unwrap_or(120),
            signal_poll_interval_ms: row
                .try_get::<Option<i64>, _>("signal_poll_interval_ms")?
                .unwrap_or(1000),
            stream_poll_interval_ms: row
                .try_get::<Option<i64>, _>("stream_poll_interval_ms")?
                .unwrap_or(500),
            queue_max_retries: row
                .try_get::<Option<i32>, _>("queue_max_retries")?
                .unwrap_or(3),
            queue_base_delay_ms: row
                .try_get::<Option<i64>, _>("queue_base_delay_ms")?
                .unwrap_or(5000),
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub async fn get(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, hold_timeout_seconds, model_timeout_seconds, signal_poll_interval_ms,
                    stream_poll_interval_ms, queue_max_retries, queue_base_delay_ms, updated_at
             FROM swarm_config
             WHERE id = 'default'",
        )
        .fetch_one(pool)
        .await?;

        Self::from_row(row)
    }

    pub async fn update(pool: &SqlitePool, data: &UpdateSwarmConfig) -> Result<Self, sqlx::Error> {
        let existing = Self::get(pool).await?;

        let hold_timeout_seconds = data
            .hold_timeout_seconds
            .unwrap_or(existing.hold_timeout_seconds);
        let model_timeout_seconds = data
            .model_timeout_seconds
            .unwrap_or(existing.model_timeout_seconds);
        let signal_poll_interval_ms = data
            .signal_poll_interval_ms
            .unwrap_or(existing.signal_poll_interval_ms);
        let stream_poll_interval_ms = data
            .stream_poll_interval_ms
            .unwrap_or(existing.stream_poll_interval_ms);
        let queue_max_retries = data.queue_max_retries.unwrap_or(existing.queue_max_retries);
        let queue_base_delay_ms = data
            .queue_base_delay_ms
            .unwrap_or(existing.queue_base_delay_ms);

        sqlx::query(
            "UPDATE swarm_config SET
                hold_timeout_seconds = $1,
                model_timeout_seconds = $2,
                signal_poll_interval_ms = $3,
                stream_poll_interval_ms = $4,
                queue_max_retries = $5,
                queue_base_delay_ms = $6,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = 'default'",
        )
        .bind(hold_timeout_seconds)
        .bind(model_timeout_seconds)
        .bind(signal_poll_interval_ms)
        .bind(stream_poll_interval_ms)
        .bind(queue_max_retries)
        .bind(queue_base_delay_ms)
        .execute(pool)
        .await?;

        Self::get(pool).await
    }
}

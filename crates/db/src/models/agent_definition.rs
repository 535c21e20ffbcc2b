use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default)]
#[sqlx(type_name = "bee_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BeeType {
    Assistant,
    Admin,
    Manager,
    #[default]
    Operator,
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default)]
#[sqlx(type_name = "bee_subtype", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BeeSubtype {
    #[default]
    None,
    Orchestrator,
    Coordinator,
    Specialist,
    Analyst,
    Compliance,
}

/// Keyword/intent triggers attached to an agent definition.
/// Stored as a JSON TEXT column.
#[derive(Debug, Clone, Serialize, Deserialize, Default, TS)]
pub struct TriggerConditions {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub intents: Vec<String>,
}

/// A bee template: the configuration-owned description of one agent.
/// Read-only to the dispatch engine.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct AgentDefinition {
    pub id: Uuid,
    pub name: String,
    pub bee_type: BeeType,
    pub bee_subtype: BeeSubtype,
    pub trigger_conditions: Option<TriggerConditions>,
    pub is_active: bool,
    #[ts(type = "Date")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "Date")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateAgentDefinition {
    pub name: String,
    pub bee_type: BeeType,
    pub bee_subtype: Option<BeeSubtype>,
    pub trigger_conditions: Option<TriggerConditions>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct UpdateAgentDefinition {
    pub name: Option<String>,
    pub bee_type: Option<BeeType>,
    pub bee_subtype: Option<BeeSubtype>,
    pub trigger_conditions: Option<TriggerConditions>,
    pub is_active: Option<bool>,
}

impl AgentDefinition {
    fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let type_str: String = row.try_get("bee_type")?;
        let bee_type = type_str.parse::<BeeType>().unwrap_or_else(|_| {
            tracing::warn!(
                bee_type = %type_str,
                "Invalid bee type in database, falling back to default"
            );
            BeeType::default()
        });

        let subtype_str: String = row.try_get("bee_subtype")?;
        let bee_subtype = subtype_str.parse::<BeeSubtype>().unwrap_or_default();

        let trigger_conditions: Option<TriggerConditions> = row
            .try_get::<Option<String>, _>("trigger_conditions")?
            .and_then(|s| serde_json::from_str(&s).ok());

        let is_active: i32 = row.try_get("is_active").unwrap_or(1);

        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            bee_type,
            bee_subtype,
            trigger_conditions,
            is_active: is_active != 0,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, name, bee_type, bee_subtype, trigger_conditions, is_active, created_at, updated_at
             FROM agent_definitions
             ORDER BY created_at ASC",
        )
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(Self::from_row).collect()
    }

    /// Active agents in creation order. The selector relies on this ordering
    /// as the stable tie-break for equal relevance scores.
    pub async fn find_active(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, name, bee_type, bee_subtype, trigger_conditions, is_active, created_at, updated_at
             FROM agent_definitions
             WHERE is_active = 1
             ORDER BY created_at ASC",
        )
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(Self::from_row).collect()
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, name, bee_type, bee_subtype, trigger_conditions, is_active, created_at, updated_at
             FROM agent_definitions
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        row.map(Self::from_row).transpose()
    }

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateAgentDefinition,
        agent_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let subtype = data.bee_subtype.unwrap_or_default();
        let trigger_json = data
            .trigger_conditions
            .as_ref()
            .map(|t| serde_json::to_string(t).unwrap_or_else(|_| "{}".to_string()));

        let row = sqlx::query(
            "INSERT INTO agent_definitions (id, name, bee_type, bee_subtype, trigger_conditions)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, name, bee_type, bee_subtype, trigger_conditions, is_active, created_at, updated_at",
        )
        .bind(agent_id)
        .bind(&data.name)
        .bind(data.bee_type.to_string())
        .bind(subtype.to_string())
        .bind(&trigger_json)
        .fetch_one(pool)
        .await?;

        Self::from_row(row)
    }

    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        data: &UpdateAgentDefinition,
    ) -> Result<Self, sqlx::Error> {
        let existing = Self::find_by_id(pool, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;

        let name = data.name.clone().unwrap_or(existing.name);
        let bee_type = data.bee_type.unwrap_or(existing.bee_type);
        let bee_subtype = data.bee_subtype.unwrap_or(existing.bee_subtype);
        let is_active = data.is_active.unwrap_or(existing.is_active);
        let trigger_conditions = data
            .trigger_conditions
            .clone()
            .or(existing.trigger_conditions);
        let trigger_json = trigger_conditions
            .as_ref()
            .map(|t| serde_json::to_string(t).unwrap_or_else(|_| "{}".to_string()));
        let is_active_int: i32 = if is_active { 1 } else { 0 };

        let row = sqlx::query(
            "UPDATE agent_definitions
             SET name = $2, bee_type = $3, bee_subtype = $4, trigger_conditions = $5,
                 is_active = $6, updated_at = CURRENT_TIMESTAMP
             WHERE id = $1
             RETURNING id, name, bee_type, bee_subtype, trigger_conditions, is_active, created_at, updated_at",
        )
        .bind(id)
        .bind(&name)
        .bind(bee_type.to_string())
        .bind(bee_subtype.to_string())
        .bind(&trigger_json)
        .bind(is_active_int)
        .fetch_one(pool)
        .await?;

        Self::from_row(row)
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM agent_definitions WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

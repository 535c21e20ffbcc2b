//! Dispatch Service
//!
//! The engine's front door. Scores an incoming request, builds the dispatch
//! plan, and either answers that a single direct response suffices or creates
//! a session and queues it for the executor. Dispatch itself never invokes a
//! model and never blocks on execution.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use db::models::agent_definition::AgentDefinition;
use db::models::bee_signal::BeeSignal;
use db::models::swarm_session::{CreateSwarmSession, SwarmSession, SwarmStatus};
use serde::Serialize;
use sqlx::SqlitePool;
use ts_rs::TS;

use super::complexity;
use super::executor::SwarmJob;
use super::queue::SwarmQueue;
use super::selector::{self, DispatchMode, DispatchPlan};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("swarm session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("failed to enqueue swarm job: {0}")]
    Queue(String),
}

/// An incoming request, as the conversational layer hands it over.
#[derive(Debug, Clone, Deserialize, TS)]
pub struct DispatchRequest {
    pub message: String,
    pub intent: Option<String>,
    #[serde(default)]
    #[ts(type = "Record<string, any>")]
    pub entities: HashMap<String, serde_json::Value>,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub verbosity: Option<String>,
    pub formality: Option<String>,
}

/// What dispatch decided. `session_id` is set only on the swarm path.
#[derive(Debug, Clone, Serialize, TS)]
pub struct DispatchOutcome {
    pub plan: DispatchPlan,
    pub session_id: Option<Uuid>,
}

pub struct DispatchService {
    db_pool: SqlitePool,
    queue: Arc<dyn SwarmQueue>,
}

impl DispatchService {
    pub fn new(db_pool: SqlitePool, queue: Arc<dyn SwarmQueue>) -> Self {
        Self { db_pool, queue }
    }

    /// Route one request. Direct mode returns only the plan; swarm mode has
    /// created a session and queued the job by the time this returns.
    pub async fn dispatch(
        &self,
        request: &DispatchRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        // An unreadable agent roster degrades to a direct response rather
        // than failing the user's request.
        let agents = match AgentDefinition::find_active(&self.db_pool).await {
            Ok(agents) => agents,
            Err(e) => {
                warn!(error = %e, "Could not load agents, degrading to direct dispatch");
                Vec::new()
            }
        };

        let complexity = complexity::assess(
            &request.message,
            request.intent.as_deref(),
            &request.entities,
            &agents,
        );
        let plan = selector::select(
            &request.message,
            request.intent.as_deref(),
            &complexity,
            &agents,
        );

        if plan.mode == DispatchMode::Direct {
            info!(
                complexity_score = plan.complexity_score,
                "Dispatching as direct response"
            );
            return Ok(DispatchOutcome {
                plan,
                session_id: None,
            });
        }

        let session = SwarmSession::create(
            &self.db_pool,
            &CreateSwarmSession {
                org_id: request.org_id,
                user_id: request.user_id,
                trigger_message: request.message.clone(),
            },
            Uuid::new_v4(),
        )
        .await?;

        info!(
            swarm_session_id = %session.id,
            complexity_score = plan.complexity_score,
            bee_count = plan.selected_bees.len(),
            "Dispatching as swarm"
        );

        let job = SwarmJob {
            swarm_session_id: session.id,
            org_id: request.org_id,
            user_id: request.user_id,
            trigger_message: request.message.clone(),
            dispatch_plan: plan.clone(),
            verbosity: request.verbosity.clone(),
            formality: request.formality.clone(),
        };

        if let Err(e) = self.queue.enqueue(job).await {
            let result = json!({ "error": format!("enqueue failed: {e}") });
            SwarmSession::finalize(&self.db_pool, session.id, SwarmStatus::Failed, &result)
                .await?;
            return Err(DispatchError::Queue(e.to_string()));
        }

        Ok(DispatchOutcome {
            plan,
            session_id: Some(session.id),
        })
    }

    /// Request cancellation of a running session. Returns whether the flag
    /// was newly set; cancelling a terminal session is a harmless no-op. The
    /// executor notices at its next checkpoint, so in-flight runs may still
    /// finish their current invocation.
    pub async fn cancel(&self, session_id: Uuid) -> Result<bool, DispatchError> {
        SwarmSession::find_by_id(&self.db_pool, session_id)
            .await?
            .ok_or(DispatchError::SessionNotFound(session_id))?;

        let rows = SwarmSession::cancel(&self.db_pool, session_id).await?;
        if rows > 0 {
            info!(swarm_session_id = %session_id, "Session cancelled");
        }
        Ok(rows > 0)
    }

    /// Resolve a signal. Idempotent: resolving twice, or resolving a signal
    /// that does not exist, succeeds without effect.
    pub async fn resolve_signal(
        &self,
        session_id: Uuid,
        signal_id: Uuid,
    ) -> Result<(), DispatchError> {
        let rows = BeeSignal::resolve(&self.db_pool, session_id, signal_id).await?;
        if rows > 0 {
            info!(
                swarm_session_id = %session_id,
                signal_id = %signal_id,
                "Signal resolved"
            );
        }
        Ok(())
    }
}

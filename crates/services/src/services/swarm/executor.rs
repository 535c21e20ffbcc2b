//! Swarm Executor
//!
//! Drives one swarm session through its dispatch plan: phases run in order,
//! bees within a phase run concurrently, outputs flow to later phases via
//! handovers and the shared hive context, and an assistant synthesizes the
//! final response. Safe to re-enter after a worker crash.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use db::models::bee_handover::BeeHandover;
use db::models::bee_run::{BeeRun, BeeRunStatus};
use db::models::bee_signal::BeeSignal;
use db::models::swarm_config::SwarmConfig;
use db::models::swarm_session::{SwarmSession, SwarmStatus};
use sqlx::SqlitePool;

use super::model::{extract_signal, strip_signal_markers, ModelInvoker};
use super::selector::{DispatchBee, DispatchPlan};
use super::stream::{ConnectionRegistry, SwarmStreamEvent};

/// Handover summaries are truncated so a chatty bee cannot flood the next
/// phase's prompt.
const HANDOVER_SUMMARY_MAX_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("swarm session not found: {0}")]
    SessionNotFound(Uuid),
}

/// Runtime knobs for one execution. Loaded from the stored engine
/// configuration at the start of each run so operators can tune a live
/// deployment.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub hold_timeout: Duration,
    pub model_timeout: Duration,
    pub signal_poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            hold_timeout: Duration::from_secs(300),
            model_timeout: Duration::from_secs(120),
            signal_poll_interval: Duration::from_millis(1000),
        }
    }
}

impl From<&SwarmConfig> for ExecutorConfig {
    fn from(config: &SwarmConfig) -> Self {
        Self {
            hold_timeout: Duration::from_secs(config.hold_timeout_seconds.max(0) as u64),
            model_timeout: Duration::from_secs(config.model_timeout_seconds.max(1) as u64),
            signal_poll_interval: Duration::from_millis(
                config.signal_poll_interval_ms.max(10) as u64
            ),
        }
    }
}

/// A queued unit of swarm work. Self-contained: a worker picking this up
/// needs nothing beyond the job and the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmJob {
    pub swarm_session_id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub trigger_message: String,
    pub dispatch_plan: DispatchPlan,
    pub verbosity: Option<String>,
    pub formality: Option<String>,
}

/// What one bee invocation produced.
struct RunOutcome {
    template_name: String,
    output: Option<String>,
    tokens: i64,
}

pub struct SwarmExecutor {
    db_pool: SqlitePool,
    model: Arc<dyn ModelInvoker>,
    registry: Arc<ConnectionRegistry>,
    fallback_config: ExecutorConfig,
}

impl SwarmExecutor {
    pub fn new(
        db_pool: SqlitePool,
        model: Arc<dyn ModelInvoker>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            db_pool,
            model,
            registry,
            fallback_config: ExecutorConfig::default(),
        }
    }

    /// Execute a swarm job to completion. Idempotent: re-invoking for a
    /// session that already reached a terminal state is a no-op, and
    /// re-invoking a half-finished session resumes where the previous worker
    /// stopped. A returned error means the session was marked failed (or the
    /// database is unreachable) and the caller may retry.
    pub async fn run(&self, job: &SwarmJob) -> Result<(), ExecutorError> {
        match self.execute(job).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    swarm_session_id = %job.swarm_session_id,
                    error = %e,
                    "Swarm execution failed"
                );
                let result = json!({ "error": e.to_string() });
                if let Err(finalize_err) = SwarmSession::finalize(
                    &self.db_pool,
                    job.swarm_session_id,
                    SwarmStatus::Failed,
                    &result,
                )
                .await
                {
                    error!(
                        swarm_session_id = %job.swarm_session_id,
                        error = %finalize_err,
                        "Failed to mark session as failed"
                    );
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, job: &SwarmJob) -> Result<(), ExecutorError> {
        let session_id = job.swarm_session_id;
        let start_time = Instant::now();

        let session = SwarmSession::find_by_id(&self.db_pool, session_id)
            .await?
            .ok_or(ExecutorError::SessionNotFound(session_id))?;

        if session.status.is_terminal() {
            info!(
                swarm_session_id = %session_id,
                status = %session.status,
                "Session already terminal, nothing to do"
            );
            return Ok(());
        }

        let config = match SwarmConfig::get(&self.db_pool).await {
            Ok(stored) => ExecutorConfig::from(&stored),
            Err(e) => {
                warn!(error = %e, "Could not load engine config, using defaults");
                self.fallback_config.clone()
            }
        };

        // Re-entry bookkeeping: runs a dead worker left behind are abandoned,
        // phases whose runs all got past the invocation are not repeated.
        let existing_runs = BeeRun::find_by_session_id(&self.db_pool, session_id).await?;
        let finished_phases = finished_phases(&existing_runs);

        for run in &existing_runs {
            if matches!(run.status, BeeRunStatus::Running | BeeRunStatus::WaitingSignal) {
                warn!(
                    swarm_session_id = %session_id,
                    bee_run_id = %run.id,
                    "Abandoning run left by a previous worker"
                );
                BeeRun::fail_run(&self.db_pool, run.id, "abandoned by previous worker", None)
                    .await?;
            }
        }

        let mut hive_context = session.hive_context.clone();
        let mut total_tokens: i64 = 0;

        // Parked runs carry output forward across the next phase boundary.
        let mut parked: Vec<(Uuid, String)> = existing_runs
            .iter()
            .filter(|r| r.status == BeeRunStatus::WaitingHandover)
            .filter_map(|r| r.output.as_ref().map(|o| (r.id, o.clone())))
            .collect();

        let (phases, assistant) = group_phases(&job.dispatch_plan);

        for (phase, bees) in &phases {
            if self.session_halted(session_id).await? {
                info!(swarm_session_id = %session_id, phase, "Session halted, stopping");
                return Ok(());
            }

            if finished_phases.contains(phase) {
                debug!(swarm_session_id = %session_id, phase, "Phase already finished, skipping");
                continue;
            }

            info!(
                swarm_session_id = %session_id,
                phase,
                bee_count = bees.len(),
                "Starting phase"
            );

            let runs = self.start_phase(session_id, *phase, bees, &parked).await?;
            let context = hive_context.join("\n\n");

            let futures = runs.iter().zip(bees.iter()).map(|(run, bee)| {
                self.execute_run(job, run, bee, &context, &config)
            });
            let outcomes = join_all(futures)
                .await
                .into_iter()
                .collect::<Result<Vec<_>, ExecutorError>>()?;

            if self.session_halted(session_id).await? {
                info!(swarm_session_id = %session_id, phase, "Session halted, discarding phase");
                return Ok(());
            }

            parked = Vec::new();
            for (run, outcome) in runs.iter().zip(outcomes) {
                total_tokens += outcome.tokens;
                if let Some(output) = outcome.output {
                    hive_context.push(format!("[{}] {}", outcome.template_name, output));
                    parked.push((run.id, output));
                }
            }
            SwarmSession::update_hive_context(&self.db_pool, session_id, &hive_context).await?;
        }

        // Final synthesis by the assistant, when the plan includes one.
        let synthesized = if let Some(bee) = assistant {
            if self.session_halted(session_id).await? {
                return Ok(());
            }
            let (text, tokens) = self
                .synthesize(job, &bee, &hive_context, &parked, &config)
                .await?;
            total_tokens += tokens;
            text
        } else {
            // No assistant means nobody promotes the last phase's parked
            // runs; complete them here so every run ends terminal.
            for (run_id, _) in &parked {
                BeeRun::complete_if_waiting(&self.db_pool, *run_id).await?;
            }
            hive_context.join("\n\n")
        };

        let result = json!({
            "synthesized_response": synthesized,
            "total_tokens": total_tokens,
            "total_duration_ms": start_time.elapsed().as_millis() as i64,
        });

        // Last write wins against a concurrent cancellation that raced past
        // the halt checks. The cancel endpoint's conditional update means a
        // session we finalize here was still running when we checked.
        if self.session_halted(session_id).await? {
            return Ok(());
        }
        SwarmSession::finalize(&self.db_pool, session_id, SwarmStatus::Completed, &result).await?;

        info!(
            swarm_session_id = %session_id,
            total_tokens,
            duration_ms = start_time.elapsed().as_millis() as i64,
            "Swarm completed"
        );

        self.registry
            .send_to_user(
                job.user_id,
                &SwarmStreamEvent::SwarmCompleted {
                    status: SwarmStatus::Completed,
                    result: result.clone(),
                },
            )
            .await;

        Ok(())
    }

    /// Create this phase's runs and hand the parked outputs of the previous
    /// phase over to them.
    async fn start_phase(
        &self,
        session_id: Uuid,
        phase: i64,
        bees: &[DispatchBee],
        parked: &[(Uuid, String)],
    ) -> Result<Vec<BeeRun>, ExecutorError> {
        let mut runs = Vec::with_capacity(bees.len());
        for bee in bees {
            let run = BeeRun::create(
                &self.db_pool,
                session_id,
                phase,
                bee.bee_type,
                &bee.template_name,
                Uuid::new_v4(),
            )
            .await?;
            runs.push(run);
        }

        for (from_run_id, output) in parked {
            let summary = truncate_summary(output);
            for run in &runs {
                BeeHandover::create(
                    &self.db_pool,
                    session_id,
                    *from_run_id,
                    run.id,
                    &summary,
                    Uuid::new_v4(),
                )
                .await?;
            }
            BeeRun::complete_if_waiting(&self.db_pool, *from_run_id).await?;
        }

        Ok(runs)
    }

    /// Invoke the model for one bee. Model failures and timeouts fail the
    /// run but not the swarm; only database errors propagate.
    async fn execute_run(
        &self,
        job: &SwarmJob,
        run: &BeeRun,
        bee: &DispatchBee,
        context: &str,
        config: &ExecutorConfig,
    ) -> Result<RunOutcome, ExecutorError> {
        let run_start = Instant::now();
        let prompt = build_bee_prompt(job, bee);

        let failed = |tokens| RunOutcome {
            template_name: bee.template_name.clone(),
            output: None,
            tokens,
        };

        let response =
            match tokio::time::timeout(config.model_timeout, self.model.invoke(&prompt, context))
                .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    warn!(bee_run_id = %run.id, error = %e, "Model invocation failed");
                    BeeRun::fail_run(
                        &self.db_pool,
                        run.id,
                        &e.to_string(),
                        Some(run_start.elapsed().as_millis() as i64),
                    )
                    .await?;
                    return Ok(failed(0));
                }
                Err(_) => {
                    warn!(bee_run_id = %run.id, "Model invocation timed out");
                    BeeRun::fail_run(
                        &self.db_pool,
                        run.id,
                        "model invocation timed out",
                        Some(run_start.elapsed().as_millis() as i64),
                    )
                    .await?;
                    return Ok(failed(0));
                }
            };

        if let Some((signal_type, message)) = extract_signal(&response.text) {
            let signal = BeeSignal::create(
                &self.db_pool,
                run.swarm_session_id,
                run.id,
                signal_type,
                &message,
                Uuid::new_v4(),
            )
            .await?;

            info!(
                bee_run_id = %run.id,
                signal_type = %signal_type,
                "Bee raised a signal"
            );

            if signal_type == db::models::bee_signal::SignalType::Escalate {
                self.registry
                    .send_to_org(job.org_id, &SwarmStreamEvent::BeeSignal(signal.clone()))
                    .await;
            }

            if signal_type.is_blocking()
                && !self.await_signal_resolution(run, &signal, config).await?
            {
                return Ok(failed(response.tokens));
            }
        }

        let output = strip_signal_markers(&response.text);
        BeeRun::park_for_handover(
            &self.db_pool,
            run.id,
            &output,
            run_start.elapsed().as_millis() as i64,
        )
        .await?;

        Ok(RunOutcome {
            template_name: bee.template_name.clone(),
            output: Some(output),
            tokens: response.tokens,
        })
    }

    /// Park the run in `waiting_signal` and poll until the hold is resolved.
    /// Returns false when the hold timed out or the session was halted, in
    /// which case the run has already been failed.
    async fn await_signal_resolution(
        &self,
        run: &BeeRun,
        signal: &BeeSignal,
        config: &ExecutorConfig,
    ) -> Result<bool, ExecutorError> {
        BeeRun::update_status(
            &self.db_pool,
            run.id,
            BeeRunStatus::WaitingSignal,
            Some(&signal.message),
        )
        .await?;

        let deadline = Instant::now() + config.hold_timeout;
        loop {
            let current = BeeSignal::find_by_id(&self.db_pool, signal.id).await?;
            if current.map(|s| s.is_resolved).unwrap_or(false) {
                debug!(bee_run_id = %run.id, signal_id = %signal.id, "Hold resolved");
                BeeRun::update_status(&self.db_pool, run.id, BeeRunStatus::Running, None).await?;
                return Ok(true);
            }

            if self.session_halted(run.swarm_session_id).await? {
                BeeRun::fail_run(
                    &self.db_pool,
                    run.id,
                    "session halted while waiting for signal",
                    None,
                )
                .await?;
                return Ok(false);
            }

            if Instant::now() >= deadline {
                warn!(
                    bee_run_id = %run.id,
                    signal_id = %signal.id,
                    "Hold signal unresolved past timeout"
                );
                BeeRun::fail_run(&self.db_pool, run.id, "hold signal timed out", None).await?;
                return Ok(false);
            }

            tokio::time::sleep(config.signal_poll_interval).await;
        }
    }

    /// The assistant's synthesis pass: one final run over the whole hive
    /// context that produces the user-facing response.
    async fn synthesize(
        &self,
        job: &SwarmJob,
        bee: &DispatchBee,
        hive_context: &[String],
        parked: &[(Uuid, String)],
        config: &ExecutorConfig,
    ) -> Result<(String, i64), ExecutorError> {
        let session_id = job.swarm_session_id;
        let runs = self
            .start_phase(session_id, bee.order, std::slice::from_ref(bee), parked)
            .await?;
        let run = &runs[0];

        let run_start = Instant::now();
        let prompt = build_synthesis_prompt(job, bee);
        let context = hive_context.join("\n\n");

        match tokio::time::timeout(config.model_timeout, self.model.invoke(&prompt, &context)).await
        {
            Ok(Ok(response)) => {
                let output = strip_signal_markers(&response.text);
                BeeRun::complete_run(
                    &self.db_pool,
                    run.id,
                    &output,
                    run_start.elapsed().as_millis() as i64,
                )
                .await?;
                Ok((output, response.tokens))
            }
            Ok(Err(e)) => {
                warn!(bee_run_id = %run.id, error = %e, "Synthesis failed, falling back to raw context");
                BeeRun::fail_run(
                    &self.db_pool,
                    run.id,
                    &e.to_string(),
                    Some(run_start.elapsed().as_millis() as i64),
                )
                .await?;
                Ok((context, 0))
            }
            Err(_) => {
                warn!(bee_run_id = %run.id, "Synthesis timed out, falling back to raw context");
                BeeRun::fail_run(
                    &self.db_pool,
                    run.id,
                    "model invocation timed out",
                    Some(run_start.elapsed().as_millis() as i64),
                )
                .await?;
                Ok((context, 0))
            }
        }
    }

    async fn session_halted(&self, session_id: Uuid) -> Result<bool, ExecutorError> {
        let session = SwarmSession::find_by_id(&self.db_pool, session_id)
            .await?
            .ok_or(ExecutorError::SessionNotFound(session_id))?;
        Ok(session.status.is_terminal())
    }
}

/// Split the plan into ordered worker phases plus the trailing assistant.
fn group_phases(plan: &DispatchPlan) -> (BTreeMap<i64, Vec<DispatchBee>>, Option<DispatchBee>) {
    let mut phases: BTreeMap<i64, Vec<DispatchBee>> = BTreeMap::new();
    let mut assistant = None;

    for bee in &plan.selected_bees {
        if bee.bee_type == db::models::agent_definition::BeeType::Assistant {
            assistant = Some(bee.clone());
        } else {
            phases.entry(bee.order).or_default().push(bee.clone());
        }
    }

    (phases, assistant)
}

/// Phases whose every run already got past the model invocation. `failed` and
/// `completed` are terminal; `waiting_handover` runs produced output and only
/// await promotion.
fn finished_phases(runs: &[BeeRun]) -> HashSet<i64> {
    let mut by_phase: BTreeMap<i64, bool> = BTreeMap::new();
    for run in runs {
        let done = run.status.is_terminal() || run.status == BeeRunStatus::WaitingHandover;
        by_phase
            .entry(run.phase)
            .and_modify(|all| *all = *all && done)
            .or_insert(done);
    }
    by_phase
        .into_iter()
        .filter_map(|(phase, done)| done.then_some(phase))
        .collect()
}

fn truncate_summary(output: &str) -> String {
    if output.chars().count() <= HANDOVER_SUMMARY_MAX_CHARS {
        return output.to_string();
    }
    output.chars().take(HANDOVER_SUMMARY_MAX_CHARS).collect()
}

fn persona_line(job: &SwarmJob) -> String {
    format!(
        "Verbosity: {} | Formality: {}\n\n",
        job.verbosity.as_deref().unwrap_or("normal"),
        job.formality.as_deref().unwrap_or("neutral"),
    )
}

/// Build the prompt for one worker bee.
fn build_bee_prompt(job: &SwarmJob, bee: &DispatchBee) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "# Agent: {} ({} / {})\n\n",
        bee.template_name, bee.bee_type, bee.bee_subtype
    ));
    prompt.push_str(&format!(
        "## Request\n{}\n\n\
         Selected because: {}\n\n",
        job.trigger_message, bee.reason
    ));
    prompt.push_str(&persona_line(job));
    prompt.push_str(
        "## Instructions\n\
         - Work only your own specialty; other agents cover the rest.\n\
         - Earlier agents' findings are in the context below. Build on them.\n\
         - Be concise. Your output becomes context for later agents.\n\n",
    );
    prompt.push_str(
        "## Signals\n\
         To request attention, emit one line anywhere in your output:\n\
         `SIGNAL: <hold|info|warning|escalate> | <message>`\n\
         `hold` pauses your work until a human resolves the signal.\n",
    );

    prompt
}

/// Build the assistant's synthesis prompt.
fn build_synthesis_prompt(job: &SwarmJob, bee: &DispatchBee) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("# Agent: {} (assistant)\n\n", bee.template_name));
    prompt.push_str(&format!(
        "## Request\n{}\n\n",
        job.trigger_message
    ));
    prompt.push_str(&persona_line(job));
    prompt.push_str(
        "## Instructions\n\
         The context below holds every specialist's findings for this request.\n\
         Synthesize them into a single coherent response for the user.\n\
         Do not mention the other agents or the orchestration process.\n",
    );

    prompt
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use db::models::agent_definition::{BeeSubtype, BeeType};
    use db::models::bee_signal::SignalType;
    use db::models::swarm_config::UpdateSwarmConfig;
    use db::models::swarm_session::CreateSwarmSession;
    use sqlx::sqlite::SqlitePoolOptions;

    use super::super::model::{ModelError, ModelResponse};
    use super::super::selector::DispatchMode;
    use super::*;

    /// Scripted model: responds per template name, errors for templates in
    /// the failure set.
    struct ScriptedModel {
        responses: HashMap<String, String>,
        failing: Vec<String>,
    }

    impl ScriptedModel {
        fn new(responses: &[(&str, &str)]) -> Self {
            Self {
                responses: responses
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                failing: Vec::new(),
            }
        }

        fn with_failing(mut self, template: &str) -> Self {
            self.failing.push(template.to_string());
            self
        }
    }

    #[async_trait]
    impl ModelInvoker for ScriptedModel {
        async fn invoke(&self, prompt: &str, _context: &str) -> Result<ModelResponse, ModelError> {
            let template = self
                .responses
                .keys()
                .chain(self.failing.iter())
                .find(|name| prompt.contains(name.as_str()))
                .cloned()
                .unwrap_or_default();

            if self.failing.contains(&template) {
                return Err(ModelError::Invocation("scripted failure".to_string()));
            }

            Ok(ModelResponse {
                text: self.responses.get(&template).cloned().unwrap_or_default(),
                tokens: 10,
            })
        }
    }

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::schema::create_all(&pool).await.unwrap();
        pool
    }

    fn bee(template: &str, bee_type: BeeType, order: i64) -> DispatchBee {
        DispatchBee {
            agent_id: Uuid::new_v4(),
            template_name: template.to_string(),
            bee_type,
            bee_subtype: BeeSubtype::None,
            order,
            relevance_score: 0.5,
            reason: "test".to_string(),
        }
    }

    fn job(session_id: Uuid, org_id: Uuid, user_id: Uuid, bees: Vec<DispatchBee>) -> SwarmJob {
        SwarmJob {
            swarm_session_id: session_id,
            org_id,
            user_id,
            trigger_message: "audit and report".to_string(),
            dispatch_plan: DispatchPlan {
                mode: DispatchMode::Swarm,
                complexity_score: 50,
                complexity_reasons: vec![],
                selected_bees: bees,
                estimated_duration_ms: 6000,
            },
            verbosity: None,
            formality: None,
        }
    }

    async fn create_session(pool: &SqlitePool) -> SwarmSession {
        SwarmSession::create(
            pool,
            &CreateSwarmSession {
                org_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                trigger_message: "audit and report".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap()
    }

    fn executor(pool: &SqlitePool, model: ScriptedModel) -> SwarmExecutor {
        SwarmExecutor::new(
            pool.clone(),
            Arc::new(model),
            Arc::new(ConnectionRegistry::new()),
        )
    }

    #[tokio::test]
    async fn test_swarm_completes_and_synthesizes() {
        let pool = setup_pool().await;
        let session = create_session(&pool).await;
        let exec = executor(
            &pool,
            ScriptedModel::new(&[
                ("auditor", "audit findings"),
                ("reporter", "report findings"),
                ("helper", "final answer"),
            ]),
        );
        let job = job(
            session.id,
            session.org_id,
            session.user_id,
            vec![
                bee("auditor", BeeType::Operator, 0),
                bee("reporter", BeeType::Operator, 0),
                bee("helper", BeeType::Assistant, 1),
            ],
        );

        exec.run(&job).await.unwrap();

        let session = SwarmSession::find_by_id(&pool, session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SwarmStatus::Completed);
        let result = session.result.unwrap();
        assert_eq!(result["synthesized_response"], "final answer");
        assert_eq!(result["total_tokens"], 30);
        assert_eq!(session.hive_context.len(), 2);

        let runs = BeeRun::find_by_session_id(&pool, session.id).await.unwrap();
        assert_eq!(runs.len(), 3);
        assert!(runs.iter().all(|r| r.status == BeeRunStatus::Completed));

        // Each phase-0 run handed over to the assistant.
        let handovers = BeeHandover::find_by_session_id(&pool, session.id)
            .await
            .unwrap();
        assert_eq!(handovers.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_bee_does_not_fail_the_swarm() {
        let pool = setup_pool().await;
        let session = create_session(&pool).await;
        let exec = executor(
            &pool,
            ScriptedModel::new(&[("auditor", "audit findings"), ("helper", "final answer")])
                .with_failing("reporter"),
        );
        let job = job(
            session.id,
            session.org_id,
            session.user_id,
            vec![
                bee("auditor", BeeType::Operator, 0),
                bee("reporter", BeeType::Operator, 0),
                bee("helper", BeeType::Assistant, 1),
            ],
        );

        exec.run(&job).await.unwrap();

        let session = SwarmSession::find_by_id(&pool, session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SwarmStatus::Completed);
        assert_eq!(session.hive_context.len(), 1);

        let runs = BeeRun::find_by_session_id(&pool, session.id).await.unwrap();
        let failed: Vec<_> = runs
            .iter()
            .filter(|r| r.status == BeeRunStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].template_name, "reporter");
    }

    #[tokio::test]
    async fn test_no_assistant_joins_hive_context() {
        let pool = setup_pool().await;
        let session = create_session(&pool).await;
        let exec = executor(&pool, ScriptedModel::new(&[("auditor", "audit findings")]));
        let job = job(
            session.id,
            session.org_id,
            session.user_id,
            vec![bee("auditor", BeeType::Operator, 0)],
        );

        exec.run(&job).await.unwrap();

        let session = SwarmSession::find_by_id(&pool, session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SwarmStatus::Completed);
        assert_eq!(
            session.result.unwrap()["synthesized_response"],
            "[auditor] audit findings"
        );
    }

    #[tokio::test]
    async fn test_no_assistant_final_phase_runs_end_terminal() {
        let pool = setup_pool().await;
        let session = create_session(&pool).await;
        let exec = executor(
            &pool,
            ScriptedModel::new(&[("auditor", "audit findings"), ("reporter", "report findings")]),
        );
        let job = job(
            session.id,
            session.org_id,
            session.user_id,
            vec![
                bee("auditor", BeeType::Operator, 0),
                bee("reporter", BeeType::Operator, 1),
            ],
        );

        exec.run(&job).await.unwrap();

        let session = SwarmSession::find_by_id(&pool, session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SwarmStatus::Completed);

        // Nobody hands over out of the last phase, so its runs must be
        // completed explicitly rather than left in waiting_handover.
        let runs = BeeRun::find_by_session_id(&pool, session.id).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.status == BeeRunStatus::Completed));
    }

    #[tokio::test]
    async fn test_hold_signal_waits_for_resolution() {
        let pool = setup_pool().await;
        SwarmConfig::update(
            &pool,
            &UpdateSwarmConfig {
                hold_timeout_seconds: Some(5),
                model_timeout_seconds: None,
                signal_poll_interval_ms: Some(25),
                stream_poll_interval_ms: None,
                queue_max_retries: None,
                queue_base_delay_ms: None,
            },
        )
        .await
        .unwrap();

        let session = create_session(&pool).await;
        let exec = executor(
            &pool,
            ScriptedModel::new(&[(
                "auditor",
                "risky finding\nSIGNAL: hold | please confirm the budget",
            )]),
        );
        let job = job(
            session.id,
            session.org_id,
            session.user_id,
            vec![bee("auditor", BeeType::Operator, 0)],
        );

        // Resolve the hold as soon as it appears.
        let resolver_pool = pool.clone();
        let session_id = session.id;
        let resolver = tokio::spawn(async move {
            loop {
                let signals = BeeSignal::find_by_session_id(&resolver_pool, session_id)
                    .await
                    .unwrap();
                if let Some(signal) = signals.first() {
                    BeeSignal::resolve(&resolver_pool, session_id, signal.id)
                        .await
                        .unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        exec.run(&job).await.unwrap();
        resolver.await.unwrap();

        let session = SwarmSession::find_by_id(&pool, session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SwarmStatus::Completed);
        // Signal markers never leak into the context.
        assert_eq!(session.hive_context, vec!["[auditor] risky finding"]);

        let signals = BeeSignal::find_by_session_id(&pool, session.id)
            .await
            .unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, SignalType::Hold);
        assert!(signals[0].is_resolved);
    }

    #[tokio::test]
    async fn test_unresolved_hold_times_out_and_fails_the_run() {
        let pool = setup_pool().await;
        SwarmConfig::update(
            &pool,
            &UpdateSwarmConfig {
                hold_timeout_seconds: Some(0),
                model_timeout_seconds: None,
                signal_poll_interval_ms: Some(25),
                stream_poll_interval_ms: None,
                queue_max_retries: None,
                queue_base_delay_ms: None,
            },
        )
        .await
        .unwrap();

        let session = create_session(&pool).await;
        let exec = executor(
            &pool,
            ScriptedModel::new(&[
                ("auditor", "SIGNAL: hold | nobody will answer"),
                ("helper", "final answer"),
            ]),
        );
        let job = job(
            session.id,
            session.org_id,
            session.user_id,
            vec![
                bee("auditor", BeeType::Operator, 0),
                bee("helper", BeeType::Assistant, 1),
            ],
        );

        exec.run(&job).await.unwrap();

        let session = SwarmSession::find_by_id(&pool, session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SwarmStatus::Completed);

        let runs = BeeRun::find_by_session_id(&pool, session.id).await.unwrap();
        let auditor = runs.iter().find(|r| r.template_name == "auditor").unwrap();
        assert_eq!(auditor.status, BeeRunStatus::Failed);
        assert_eq!(auditor.status_text.as_deref(), Some("hold signal timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_session_is_a_noop() {
        let pool = setup_pool().await;
        let session = create_session(&pool).await;
        SwarmSession::cancel(&pool, session.id).await.unwrap();

        let exec = executor(&pool, ScriptedModel::new(&[("auditor", "never called")]));
        let job = job(
            session.id,
            session.org_id,
            session.user_id,
            vec![bee("auditor", BeeType::Operator, 0)],
        );

        exec.run(&job).await.unwrap();

        let runs = BeeRun::find_by_session_id(&pool, session.id).await.unwrap();
        assert!(runs.is_empty());
        let session = SwarmSession::find_by_id(&pool, session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SwarmStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_reentry_skips_finished_phases() {
        let pool = setup_pool().await;
        let session = create_session(&pool).await;

        // A previous worker finished phase 0 and died mid phase 1.
        let done = BeeRun::create(&pool, session.id, 0, BeeType::Operator, "auditor", Uuid::new_v4())
            .await
            .unwrap();
        BeeRun::park_for_handover(&pool, done.id, "earlier findings", 100)
            .await
            .unwrap();
        let dead = BeeRun::create(
            &pool,
            session.id,
            1,
            BeeType::Operator,
            "coordinator",
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        SwarmSession::update_hive_context(
            &pool,
            session.id,
            &["[auditor] earlier findings".to_string()],
        )
        .await
        .unwrap();

        let exec = executor(
            &pool,
            ScriptedModel::new(&[
                ("coordinator", "coordination done"),
                ("helper", "final answer"),
            ]),
        );
        let job = job(
            session.id,
            session.org_id,
            session.user_id,
            vec![
                bee("auditor", BeeType::Operator, 0),
                bee("coordinator", BeeType::Operator, 1),
                bee("helper", BeeType::Assistant, 2),
            ],
        );

        exec.run(&job).await.unwrap();

        let abandoned = BeeRun::find_by_id(&pool, dead.id).await.unwrap().unwrap();
        assert_eq!(abandoned.status, BeeRunStatus::Failed);
        assert_eq!(
            abandoned.status_text.as_deref(),
            Some("abandoned by previous worker")
        );

        let session = SwarmSession::find_by_id(&pool, session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SwarmStatus::Completed);
        // Phase 0 was not re-run: one auditor run total, its output kept.
        let runs = BeeRun::find_by_session_id(&pool, session.id).await.unwrap();
        assert_eq!(
            runs.iter().filter(|r| r.template_name == "auditor").count(),
            1
        );
        assert_eq!(
            session.hive_context,
            vec![
                "[auditor] earlier findings".to_string(),
                "[coordinator] coordination done".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_terminal_session_reentry_is_a_noop() {
        let pool = setup_pool().await;
        let session = create_session(&pool).await;
        SwarmSession::finalize(&pool, session.id, SwarmStatus::Completed, &json!({"done": true}))
            .await
            .unwrap();

        let exec = executor(&pool, ScriptedModel::new(&[("auditor", "never called")]));
        let job = job(
            session.id,
            session.org_id,
            session.user_id,
            vec![bee("auditor", BeeType::Operator, 0)],
        );

        exec.run(&job).await.unwrap();

        let session = SwarmSession::find_by_id(&pool, session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.result.unwrap()["done"], true);
        assert!(BeeRun::find_by_session_id(&pool, session.id)
            .await
            .unwrap()
            .is_empty());
    }
}

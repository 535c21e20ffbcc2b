//! Bee Selector
//!
//! Turns a complexity assessment plus the active agent definitions into a
//! dispatch plan: direct for simple requests, a phased swarm otherwise.

use db::models::agent_definition::{AgentDefinition, BeeSubtype, BeeType};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::complexity::{
    ANALYSIS_VOCAB, COMPLIANCE_VOCAB, COORDINATION_VOCAB, ComplexityResult, vocab_match_count,
};

/// Requests scoring below this go down the direct path untouched.
pub const SWARM_THRESHOLD: i64 = 30;
/// Hard cap on selected bees, to bound cost and latency.
pub const MAX_SELECTED_BEES: usize = 6;
/// Nominal duration of one phase. Phase members run in parallel, so the
/// estimate only counts distinct phases.
pub const PHASE_DURATION_MS: i64 = 3000;
/// Minimum relevance to stay in the plan.
const RELEVANCE_CUTOFF: f64 = 0.3;
/// The assistant performs final synthesis and must always be eligible.
const ASSISTANT_SCORE_FLOOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DispatchMode {
    Direct,
    Swarm,
}

/// A selection-time record: one agent scheduled into the plan.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct DispatchBee {
    pub agent_id: Uuid,
    pub template_name: String,
    pub bee_type: BeeType,
    pub bee_subtype: BeeSubtype,
    /// Phase number; bees sharing a phase execute concurrently.
    pub order: i64,
    pub relevance_score: f64,
    pub reason: String,
}

/// Immutable once produced; passed whole into the executor.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct DispatchPlan {
    pub mode: DispatchMode,
    pub complexity_score: i64,
    pub complexity_reasons: Vec<String>,
    pub selected_bees: Vec<DispatchBee>,
    pub estimated_duration_ms: i64,
}

impl DispatchPlan {
    fn direct(complexity: &ComplexityResult) -> Self {
        Self {
            mode: DispatchMode::Direct,
            complexity_score: complexity.score,
            complexity_reasons: complexity.reasons.clone(),
            selected_bees: Vec::new(),
            estimated_duration_ms: 0,
        }
    }
}

/// Build a dispatch plan for the request.
///
/// Degrades to direct rather than failing: below-threshold scores, an empty
/// agent set, or a selection that keeps nobody all yield a direct plan.
pub fn select(
    message: &str,
    intent: Option<&str>,
    complexity: &ComplexityResult,
    active_agents: &[AgentDefinition],
) -> DispatchPlan {
    if complexity.score < SWARM_THRESHOLD {
        return DispatchPlan::direct(complexity);
    }

    let message_lower = message.to_lowercase();

    let mut kept: Vec<DispatchBee> = Vec::new();
    for agent in active_agents {
        let (score, reason) = relevance(agent, &message_lower, intent);
        if score > RELEVANCE_CUTOFF {
            kept.push(DispatchBee {
                agent_id: agent.id,
                template_name: agent.name.clone(),
                bee_type: agent.bee_type,
                bee_subtype: agent.bee_subtype,
                order: phase_for(agent.bee_type, agent.bee_subtype),
                relevance_score: score,
                reason,
            });
        }
    }

    if kept.is_empty() {
        tracing::debug!(
            score = complexity.score,
            "No relevant agents for swarm-level request, degrading to direct"
        );
        return DispatchPlan::direct(complexity);
    }

    // The assistant is scheduled separately as the final synthesis phase and
    // must survive truncation; keep only the best-scoring one.
    let mut assistant: Option<DispatchBee> = None;
    kept.retain(|bee| {
        if bee.bee_type == BeeType::Assistant {
            let better = assistant
                .as_ref()
                .map(|a| bee.relevance_score > a.relevance_score)
                .unwrap_or(true);
            if better {
                assistant = Some(bee.clone());
            }
            false
        } else {
            true
        }
    });

    // Stable sort: equal (order, relevance) pairs keep agent input order.
    kept.sort_by(|a, b| {
        a.order.cmp(&b.order).then(
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });

    let cap = if assistant.is_some() {
        MAX_SELECTED_BEES - 1
    } else {
        MAX_SELECTED_BEES
    };
    kept.truncate(cap);

    if let Some(mut bee) = assistant {
        let max_order = kept.iter().map(|b| b.order).max().unwrap_or(-1);
        bee.order = max_order + 1;
        kept.push(bee);
    }

    let mut distinct_orders: Vec<i64> = kept.iter().map(|b| b.order).collect();
    distinct_orders.dedup();
    let estimated_duration_ms = distinct_orders.len() as i64 * PHASE_DURATION_MS;

    DispatchPlan {
        mode: DispatchMode::Swarm,
        complexity_score: complexity.score,
        complexity_reasons: complexity.reasons.clone(),
        selected_bees: kept,
        estimated_duration_ms,
    }
}

/// Relevance of one agent to the request, in [0, 1].
fn relevance(
    agent: &AgentDefinition,
    message_lower: &str,
    intent: Option<&str>,
) -> (f64, String) {
    let mut score: f64 = 0.0;
    let mut parts: Vec<String> = Vec::new();

    let conditions = agent.trigger_conditions.as_ref();

    if let (Some(intent), Some(conditions)) = (intent, conditions)
        && conditions.intents.iter().any(|ci| ci == intent)
    {
        score += 0.4;
        parts.push(format!("intent '{}'", intent));
    }

    if let Some(conditions) = conditions {
        let matches = conditions
            .keywords
            .iter()
            .filter(|kw| message_lower.contains(&kw.to_lowercase()))
            .count();
        if matches > 0 {
            score += (matches as f64 * 0.15).min(0.4);
            parts.push(format!("{} keyword matches", matches));
        }
    }

    // Subtype/domain alignment, each subtype checked independently
    if agent.bee_subtype == BeeSubtype::Analyst && vocab_match_count(message_lower, ANALYSIS_VOCAB) > 0
    {
        score += 0.2;
        parts.push("analysis alignment".to_string());
    }
    if agent.bee_subtype == BeeSubtype::Compliance
        && vocab_match_count(message_lower, COMPLIANCE_VOCAB) > 0
    {
        score += 0.2;
        parts.push("compliance alignment".to_string());
    }
    if agent.bee_subtype == BeeSubtype::Coordinator
        && vocab_match_count(message_lower, COORDINATION_VOCAB) > 0
    {
        score += 0.2;
        parts.push("coordination alignment".to_string());
    }

    if agent.bee_type == BeeType::Assistant && score < ASSISTANT_SCORE_FLOOR {
        score = ASSISTANT_SCORE_FLOOR;
        parts.push("synthesis assistant".to_string());
    }

    let reason = if parts.is_empty() {
        "no trigger matched".to_string()
    } else {
        parts.join(", ")
    };

    (score.min(1.0), reason)
}

/// Fixed priority table mapping (type, subtype) to a phase number. The
/// assistant never goes through this table; it is appended as the final
/// synthesis phase by `select`.
fn phase_for(bee_type: BeeType, bee_subtype: BeeSubtype) -> i64 {
    match (bee_type, bee_subtype) {
        (_, BeeSubtype::Analyst) | (_, BeeSubtype::Compliance) => 0,
        (_, BeeSubtype::Coordinator) | (_, BeeSubtype::Orchestrator) | (BeeType::Manager, _) => 1,
        (_, BeeSubtype::Specialist) | (BeeType::Admin, _) | (BeeType::Operator, _) => 2,
        _ => 3,
    }
}

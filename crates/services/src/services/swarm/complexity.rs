//! Complexity Assessor
//!
//! Pure heuristic scoring of how "complex" an incoming request is, from
//! lexical and entity signals. Deliberately a cheap, explainable heuristic
//! rather than a second model call, so dispatch decisions stay instantaneous
//! on the request's hot path.

use std::collections::{HashMap, HashSet};

use db::models::agent_definition::AgentDefinition;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use ts_rs::TS;

/// Result of a complexity assessment. Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
pub struct ComplexityResult {
    /// Clamped to 0..=100.
    pub score: i64,
    /// One entry per scoring rule that fired, in evaluation order.
    pub reasons: Vec<String>,
}

/// Compliance / audit / security vocabulary.
pub(crate) const COMPLIANCE_VOCAB: &[&str] = &[
    "compliance",
    "audit",
    "security",
    "regulation",
    "regulatory",
    "policy",
    "risk",
];

/// Analysis / reporting vocabulary.
pub(crate) const ANALYSIS_VOCAB: &[&str] = &[
    "analyze",
    "analysis",
    "analytics",
    "report",
    "reporting",
    "metrics",
    "insight",
    "trend",
    "workload",
];

/// Cross-team coordination vocabulary.
pub(crate) const COORDINATION_VOCAB: &[&str] = &[
    "coordinate",
    "coordination",
    "cross-team",
    "align",
    "alignment",
    "rollout",
    "handoff",
];

// Sequencing phrases that suggest a multi-step request.
static MULTI_STEP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(then|after that|next|finally|first|second|third|subsequently|lastly)\b")
        .expect("Invalid multi-step regex")
});

/// Score an incoming request. Pure and deterministic: identical inputs always
/// yield the identical result.
pub fn assess(
    message: &str,
    intent: Option<&str>,
    entities: &HashMap<String, serde_json::Value>,
    active_agents: &[AgentDefinition],
) -> ComplexityResult {
    let message_lower = message.to_lowercase();
    let mut score: i64 = 0;
    let mut reasons: Vec<String> = Vec::new();

    // Entity richness
    let entity_count = entities.values().filter(|v| !v.is_null()).count();
    if entity_count > 3 {
        score += 20;
        reasons.push(format!("{} entities extracted", entity_count));
    }

    // Cross-entity references
    let project_refs = distinct_project_refs(entities);
    if project_refs > 1 {
        score += 25;
        reasons.push(format!("{} projects referenced", project_refs));
    }

    // Multi-step language
    let step_matches = MULTI_STEP_REGEX.find_iter(&message_lower).count() as i64;
    if step_matches > 0 {
        let contribution = (step_matches * 10).min(20);
        score += contribution;
        reasons.push(format!("{} sequencing phrases", step_matches));
    }

    // Domain triggers, each checked independently
    if matches_vocab(&message_lower, COMPLIANCE_VOCAB) {
        score += 15;
        reasons.push("compliance vocabulary".to_string());
    }
    if matches_vocab(&message_lower, ANALYSIS_VOCAB) {
        score += 15;
        reasons.push("analysis vocabulary".to_string());
    }
    if matches_vocab(&message_lower, COORDINATION_VOCAB) {
        score += 15;
        reasons.push("coordination vocabulary".to_string());
    }

    // Per-agent triggers: +10 for every active agent whose configuration
    // matches the request, unbounded before the global clamp.
    for agent in active_agents {
        if agent_triggers_match(agent, &message_lower, intent) {
            score += 10;
            reasons.push(format!("agent trigger: {}", agent.name));
        }
    }

    ComplexityResult {
        score: score.clamp(0, 100),
        reasons,
    }
}

/// True when any keyword of the vocabulary occurs in the lowercased message.
pub(crate) fn matches_vocab(message_lower: &str, vocab: &[&str]) -> bool {
    vocab.iter().any(|kw| message_lower.contains(kw))
}

/// Count of keywords from the vocabulary occurring in the lowercased message.
pub(crate) fn vocab_match_count(message_lower: &str, vocab: &[&str]) -> usize {
    vocab.iter().filter(|kw| message_lower.contains(*kw)).count()
}

/// True when the agent's configured trigger keywords or declared intents
/// match the request.
pub(crate) fn agent_triggers_match(
    agent: &AgentDefinition,
    message_lower: &str,
    intent: Option<&str>,
) -> bool {
    let Some(conditions) = &agent.trigger_conditions else {
        return false;
    };

    let keyword_hit = conditions
        .keywords
        .iter()
        .any(|kw| message_lower.contains(&kw.to_lowercase()));

    let intent_hit = intent
        .map(|i| conditions.intents.iter().any(|ci| ci == i))
        .unwrap_or(false);

    keyword_hit || intent_hit
}

/// Distinct project references across the extracted entities. Any entity key
/// containing "project" counts; array values contribute each element.
fn distinct_project_refs(entities: &HashMap<String, serde_json::Value>) -> usize {
    let mut refs: HashSet<String> = HashSet::new();

    for (key, value) in entities {
        if !key.to_lowercase().contains("project") {
            continue;
        }
        match value {
            serde_json::Value::Array(items) => {
                for item in items {
                    if !item.is_null() {
                        refs.insert(item.to_string());
                    }
                }
            }
            serde_json::Value::Null => {}
            other => {
                refs.insert(other.to_string());
            }
        }
    }

    refs.len()
}

#[cfg(test)]
mod tests {
    use db::models::agent_definition::{BeeSubtype, BeeType, TriggerConditions};
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn agent(name: &str, keywords: &[&str], intents: &[&str]) -> AgentDefinition {
        AgentDefinition {
            id: Uuid::new_v4(),
            name: name.to_string(),
            bee_type: BeeType::Operator,
            bee_subtype: BeeSubtype::None,
            trigger_conditions: Some(TriggerConditions {
                keywords: keywords.iter().map(|s| s.to_string()).collect(),
                intents: intents.iter().map(|s| s.to_string()).collect(),
            }),
            is_active: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_assess_is_pure() {
        let entities = HashMap::from([("project_id".to_string(), json!("p-1"))]);
        let agents = vec![agent("billing", &["invoice"], &["billing"])];

        let a = assess("audit the invoices, then report", Some("billing"), &entities, &agents);
        let b = assess("audit the invoices, then report", Some("billing"), &entities, &agents);
        assert_eq!(a, b);
    }

    #[test]
    fn test_score_is_clamped_to_100() {
        let agents: Vec<AgentDefinition> = (0..20)
            .map(|i| agent(&format!("bee-{}", i), &["audit"], &[]))
            .collect();
        let entities = HashMap::from([
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!(2)),
            ("c".to_string(), json!(3)),
            ("d".to_string(), json!(4)),
            ("projects".to_string(), json!(["p1", "p2"])),
        ]);

        let result = assess(
            "audit compliance risk, then analyze the report, finally coordinate rollout",
            None,
            &entities,
            &agents,
        );
        assert_eq!(result.score, 100);
    }

    #[test]
    fn test_multi_step_contribution_capped_at_20() {
        let entities = HashMap::new();
        // "then" and "finally": 2 matches -> min(20, 2 * 10) = 20
        let two = assess("do this, then that, finally done", None, &entities, &[]);
        assert_eq!(two.score, 20);

        // 4 matches still contribute only 20
        let four = assess(
            "first this, then that, next another, finally done",
            None,
            &entities,
            &[],
        );
        assert_eq!(four.score, 20);
    }

    #[test]
    fn test_entity_richness_and_project_refs() {
        let entities = HashMap::from([
            ("task".to_string(), json!("t-1")),
            ("assignee".to_string(), json!("u-1")),
            ("due".to_string(), json!("tomorrow")),
            ("label".to_string(), json!("infra")),
            ("project_ids".to_string(), json!(["p-1", "p-2"])),
        ]);

        let result = assess("move it over", None, &entities, &[]);
        // 5 non-null entities (+20) and 2 distinct projects (+25)
        assert_eq!(result.score, 45);
        assert_eq!(result.reasons.len(), 2);
    }

    #[test]
    fn test_domain_vocabularies_accumulate() {
        let entities = HashMap::new();
        let result = assess(
            "audit compliance risk and analyze workload and coordinate a rollout",
            None,
            &entities,
            &[],
        );
        assert_eq!(result.score, 45);
    }

    #[test]
    fn test_simple_message_scores_below_threshold() {
        let entities = HashMap::new();
        let result = assess("check my tasks", None, &entities, &[]);
        assert_eq!(result.score, 0);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_agent_intent_trigger() {
        let entities = HashMap::new();
        let agents = vec![
            agent("reporter", &[], &["generate_report"]),
            agent("other", &["deploy"], &[]),
        ];
        let result = assess("make me a summary", Some("generate_report"), &entities, &agents);
        assert_eq!(result.score, 10);
        assert_eq!(result.reasons, vec!["agent trigger: reporter".to_string()]);
    }

    #[test]
    fn test_null_entities_do_not_count() {
        let entities = HashMap::from([
            ("a".to_string(), json!(null)),
            ("b".to_string(), json!(null)),
            ("c".to_string(), json!(null)),
            ("d".to_string(), json!(null)),
        ]);
        let result = assess("hello", None, &entities, &[]);
        assert_eq!(result.score, 0);
    }
}

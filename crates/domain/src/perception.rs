use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What triggered a perception cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerceptionKind {
    UserQuery,
    StepResult,
}

/// The ERORLL critique record produced by the perception agent: Entities,
/// result Requirement, Original-goal-achieved, Reasoning,
/// Local-goal-achieved, Local-reasoning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionSnapshot {
    pub kind: PerceptionKind,
    #[serde(default)]
    pub entities: Vec<String>,
    pub result_requirement: String,
    pub original_goal_achieved: bool,
    pub local_goal_achieved: bool,
    pub reasoning: String,
    pub local_reasoning: String,
    pub confidence: f32,
    pub solution_summary: String,
    #[serde(default)]
    pub require_ground_truth: bool,
    pub timestamp: DateTime<Utc>,
}

impl PerceptionSnapshot {
    /// Build the defensive low-confidence snapshot returned when the LLM's
    /// output fails to parse against the expected schema. The agent must
    /// never propagate a parse error past this boundary.
    pub fn fallback(kind: PerceptionKind, raw_error: impl Into<String>) -> Self {
        Self {
            kind,
            entities: Vec::new(),
            result_requirement: String::new(),
            original_goal_achieved: false,
            local_goal_achieved: false,
            reasoning: format!("perception output did not match the expected schema: {}", raw_error.into()),
            local_reasoning: String::new(),
            confidence: 0.0,
            solution_summary: String::new(),
            require_ground_truth: false,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_low_confidence_and_never_panics() {
        let snap = PerceptionSnapshot::fallback(PerceptionKind::UserQuery, "missing field `entities`");
        assert_eq!(snap.confidence, 0.0);
        assert!(!snap.original_goal_achieved);
        assert!(snap.reasoning.contains("missing field"));
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::perception::PerceptionSnapshot;
use crate::plan::PlanStep;

/// One piece of context retrieved for the current query, tagged with the
/// tier it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub require_ground_truth: bool,
}

/// Human-in-the-loop approval switches for a session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HitlConfig {
    #[serde(default)]
    pub require_plan_approval: bool,
    #[serde(default)]
    pub require_step_approval: bool,
}

/// The shared, per-session state that every agent reads and writes (C9).
///
/// A `Blackboard` is owned exclusively by one coordinator loop for the
/// lifetime of a query; it is not internally synchronised; multiple
/// sessions, each with their own blackboard, may run in parallel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackboardState {
    pub session_id: Uuid,
    pub original_query: String,
    /// Ordered list of plan versions; each replan appends a new version.
    /// Old versions and their steps are never rewritten.
    pub plan_versions: Vec<Vec<PlanStep>>,
    pub current_plan_index: usize,
    pub latest_perception: Option<PerceptionSnapshot>,
    pub context_data: HashMap<String, ContextEntry>,
    /// Append-only failure/trace log for this session.
    pub session_memory: Vec<String>,
    pub user_feedback: Vec<String>,
    pub hitl_config: HitlConfig,
    pub final_answer: Option<String>,
}

impl BlackboardState {
    pub fn new(session_id: Uuid, original_query: impl Into<String>, hitl_config: HitlConfig) -> Self {
        Self {
            session_id,
            original_query: original_query.into(),
            plan_versions: Vec::new(),
            current_plan_index: 0,
            latest_perception: None,
            context_data: HashMap::new(),
            session_memory: Vec::new(),
            user_feedback: Vec::new(),
            hitl_config,
            final_answer: None,
        }
    }

    /// Append a new plan version and make it current. Step indices must be
    /// unique within the version being appended.
    pub fn add_plan_version(&mut self, steps: Vec<PlanStep>) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for step in &steps {
            if !seen.insert(step.step_index) {
                return Err(Error::BlackboardInvariant(format!(
                    "duplicate step_index {} in new plan version",
                    step.step_index
                )));
            }
        }
        self.plan_versions.push(steps);
        self.current_plan_index = self.plan_versions.len() - 1;
        Ok(())
    }

    /// Append one step to the current plan version (used by `replan` mode).
    pub fn append_step(&mut self, step: PlanStep) -> Result<()> {
        let version = self
            .plan_versions
            .get_mut(self.current_plan_index)
            .ok_or_else(|| Error::BlackboardInvariant("no plan version to append to".into()))?;
        if version.iter().any(|s| s.step_index == step.step_index) {
            return Err(Error::BlackboardInvariant(format!(
                "duplicate step_index {} in current plan version",
                step.step_index
            )));
        }
        version.push(step);
        Ok(())
    }

    /// The steps of the current plan version, in order.
    pub fn current_plan(&self) -> &[PlanStep] {
        self.plan_versions
            .get(self.current_plan_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Mutate a step by index within the current plan version. A step may
    /// transition out of `Pending` at most once per execution attempt.
    pub fn update_step<F>(&mut self, step_index: u32, f: F) -> Result<()>
    where
        F: FnOnce(&mut PlanStep),
    {
        let version = self
            .plan_versions
            .get_mut(self.current_plan_index)
            .ok_or_else(|| Error::BlackboardInvariant("no current plan version".into()))?;
        let step = version
            .iter_mut()
            .find(|s| s.step_index == step_index)
            .ok_or_else(|| Error::BlackboardInvariant(format!("no step with index {step_index}")))?;
        f(step);
        Ok(())
    }

    pub fn log_failure(&mut self, query: &str, error: &str) {
        self.session_memory
            .push(format!("query={query} error={error}"));
    }

    pub fn update_perception(&mut self, snapshot: PerceptionSnapshot) {
        self.latest_perception = Some(snapshot);
    }

    /// A deep copy of the current state, suitable for logging or snapshot
    /// persistence without risking aliasing into the live state.
    pub fn snapshot(&self) -> BlackboardState {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanStep;

    fn bb() -> BlackboardState {
        BlackboardState::new(Uuid::new_v4(), "what is 2+2?", HitlConfig::default())
    }

    #[test]
    fn duplicate_step_index_in_same_version_rejected() {
        let mut bb = bb();
        let steps = vec![
            PlanStep::new_code(0, "a", "result = 1"),
            PlanStep::new_code(0, "b", "result = 2"),
        ];
        assert!(bb.add_plan_version(steps).is_err());
    }

    #[test]
    fn append_step_rejects_duplicate_index() {
        let mut bb = bb();
        bb.add_plan_version(vec![PlanStep::new_code(0, "a", "result = 1")]).unwrap();
        let dup = PlanStep::new_code(0, "b", "result = 2");
        assert!(bb.append_step(dup).is_err());
    }

    #[test]
    fn current_plan_reflects_latest_version() {
        let mut bb = bb();
        bb.add_plan_version(vec![PlanStep::new_code(0, "a", "result = 1")]).unwrap();
        bb.add_plan_version(vec![PlanStep::new_code(0, "b", "result = 2")]).unwrap();
        assert_eq!(bb.current_plan()[0].description, "b");
    }

    #[test]
    fn snapshot_is_an_independent_copy() {
        let mut bb = bb();
        bb.add_plan_version(vec![PlanStep::new_code(0, "a", "result = 1")]).unwrap();
        let snap = bb.snapshot();
        bb.add_plan_version(vec![PlanStep::new_code(0, "b", "result = 2")]).unwrap();
        assert_eq!(snap.plan_versions.len(), 1);
        assert_eq!(bb.plan_versions.len(), 2);
    }
}

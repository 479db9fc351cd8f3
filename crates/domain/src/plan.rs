use serde::{Deserialize, Serialize};

/// The kind of action a plan step carries out. Named `StepKind` rather than
/// `type` since the latter is a Rust keyword; the wire representation still
/// uses the spec's vocabulary via `rename_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Code,
    Conclude,
    Nop,
    AskUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
    Skipped,
}

/// One unit of intended action, produced by the decision agent and mutated
/// by the sandboxed executor as it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_index: u32,
    pub description: String,
    pub kind: StepKind,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub conclusion: String,
    pub status: StepStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub execution_result: Option<String>,
    #[serde(default)]
    pub execution_time: Option<f64>,
}

impl PlanStep {
    pub fn new_code(step_index: u32, description: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            step_index,
            description: description.into(),
            kind: StepKind::Code,
            code: code.into(),
            conclusion: String::new(),
            status: StepStatus::Pending,
            attempts: 0,
            execution_result: None,
            execution_time: None,
        }
    }

    pub fn new_conclude(step_index: u32, description: impl Into<String>, conclusion: impl Into<String>) -> Self {
        Self {
            step_index,
            description: description.into(),
            kind: StepKind::Conclude,
            code: String::new(),
            conclusion: conclusion.into(),
            status: StepStatus::Pending,
            attempts: 0,
            execution_result: None,
            execution_time: None,
        }
    }

    pub fn new_ask_user(step_index: u32, description: impl Into<String>) -> Self {
        Self {
            step_index,
            description: description.into(),
            kind: StepKind::AskUser,
            code: String::new(),
            conclusion: String::new(),
            status: StepStatus::Pending,
            attempts: 0,
            execution_result: None,
            execution_time: None,
        }
    }

    /// A step whose shape violates the CODE/CONCLUDE exclusivity invariant:
    /// `CONCLUDE` must carry a non-empty `conclusion` and empty `code`, and
    /// the inverse for `CODE`.
    pub fn is_well_formed(&self) -> bool {
        match self.kind {
            StepKind::Conclude => !self.conclusion.is_empty() && self.code.is_empty(),
            StepKind::Code => self.conclusion.is_empty() && !self.code.is_empty(),
            StepKind::Nop | StepKind::AskUser => self.code.is_empty() && self.conclusion.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conclude_step_must_carry_conclusion_and_no_code() {
        let step = PlanStep::new_conclude(0, "wrap up", "the answer is 42");
        assert!(step.is_well_formed());
    }

    #[test]
    fn code_step_with_conclusion_is_malformed() {
        let mut step = PlanStep::new_code(0, "compute", "result = 1 + 1");
        step.conclusion = "oops".into();
        assert!(!step.is_well_formed());
    }

    #[test]
    fn ask_user_step_carries_neither() {
        let step = PlanStep::new_ask_user(0, "please clarify");
        assert!(step.is_well_formed());
    }
}

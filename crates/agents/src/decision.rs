//! Decision Agent (C8): turns a perception snapshot into the next plan step.

use qa_domain::blackboard::ContextEntry;
use qa_domain::perception::PerceptionSnapshot;
use qa_domain::plan::PlanStep;
use qa_domain::tool::Message;
use qa_providers::{ChatRequest, LlmProvider};

const DECISION_PROMPT: &str = r#"You are the decision agent of an advanced AI system.
Given the user's goal, the latest perception, and the context gathered so
far, decide the single next step.

Priorities, in order:
1. If the context already contains the answer, respond with a CONCLUDE step.
2. Otherwise prefer context already in hand (documents, session memory)
   over issuing a new web search.
3. Otherwise write a CODE step: a short, self-contained snippet. Do not
   assume any variable from a previous step still exists.

Respond with exactly this JSON shape and nothing else:
{
  "kind": "CODE" | "CONCLUDE" | "NOP",
  "description": "one short sentence describing this step",
  "code": "the snippet source, only when kind is CODE",
  "conclusion": "the final answer text, only when kind is CONCLUDE"
}"#;

/// Whether this decision extends a fresh plan or inserts into a running one
/// after a failed/incomplete step. The coordinator (C10), not this agent,
/// decides whether the resulting step becomes the first entry of a new plan
/// version or is appended to the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionMode {
    Initial,
    Replan,
}

#[derive(serde::Deserialize)]
struct RawDecision {
    kind: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    conclusion: String,
}

/// Decides the next plan step.
///
/// A failed prior step forces `ASK_USER` without consulting the model at
/// all: the original source never retries a failed tool call through the
/// decision agent, it always surfaces the failure to the user instead.
pub async fn decide(
    llm: &dyn LlmProvider,
    next_step_index: u32,
    query: &str,
    perception: Option<&PerceptionSnapshot>,
    context: &[ContextEntry],
    last_step_failed: bool,
    mode: DecisionMode,
) -> PlanStep {
    if last_step_failed {
        return PlanStep::new_ask_user(next_step_index, "the previous step failed and will not be retried");
    }

    if let Some(snapshot) = perception {
        if snapshot.original_goal_achieved && !snapshot.solution_summary.is_empty() {
            return PlanStep::new_conclude(next_step_index, "goal already satisfied", snapshot.solution_summary.clone());
        }
    }

    let context_block = context
        .iter()
        .map(|c| format!("[{}] {}", c.source, c.text))
        .collect::<Vec<_>>()
        .join("\n");
    let perception_block = perception
        .map(|p| format!("reasoning: {}\nconfidence: {}", p.reasoning, p.confidence))
        .unwrap_or_default();
    let mode_label = match mode {
        DecisionMode::Initial => "initial",
        DecisionMode::Replan => "replan",
    };

    let prompt = format!(
        "{DECISION_PROMPT}\n\n--- MODE ---\n{mode_label}\n\n--- GOAL ---\n{query}\n\n--- PERCEPTION ---\n{perception_block}\n\n--- CONTEXT ---\n{context_block}"
    );

    let request = ChatRequest {
        messages: vec![Message::system(DECISION_PROMPT), Message::user(prompt)],
        json_mode: true,
        ..Default::default()
    };

    match llm.chat(request).await {
        Ok(response) => match serde_json::from_str::<RawDecision>(&response.content) {
            Ok(raw) => build_step(next_step_index, raw),
            Err(e) => {
                tracing::warn!(error = %e, "decision response failed to parse");
                PlanStep::new_ask_user(next_step_index, "could not determine the next step")
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "decision LLM call failed");
            PlanStep::new_ask_user(next_step_index, "could not determine the next step")
        }
    }
}

fn build_step(step_index: u32, raw: RawDecision) -> PlanStep {
    let description = if raw.description.is_empty() { "next step".to_string() } else { raw.description };
    match raw.kind.as_str() {
        "CONCLUDE" if !raw.conclusion.is_empty() => PlanStep::new_conclude(step_index, description, raw.conclusion),
        "CODE" if !raw.code.is_empty() => PlanStep::new_code(step_index, description, raw.code),
        "NOP" => {
            let mut step = PlanStep::new_ask_user(step_index, description);
            step.kind = qa_domain::plan::StepKind::Nop;
            step
        }
        _ => PlanStep::new_ask_user(step_index, "decision output did not match the expected schema"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qa_providers::fake::ScriptedLlmProvider;

    fn snapshot(goal_achieved: bool, summary: &str) -> PerceptionSnapshot {
        PerceptionSnapshot {
            kind: qa_domain::perception::PerceptionKind::StepResult,
            entities: vec![],
            result_requirement: String::new(),
            original_goal_achieved: goal_achieved,
            local_goal_achieved: goal_achieved,
            reasoning: "because".into(),
            local_reasoning: String::new(),
            confidence: 0.9,
            solution_summary: summary.into(),
            require_ground_truth: false,
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn failed_prior_step_forces_ask_user_without_calling_the_model() {
        let llm = ScriptedLlmProvider::new(vec![]); // would error if ever called
        let step = decide(&llm, 1, "q", None, &[], true, DecisionMode::Replan).await;
        assert_eq!(step.kind, qa_domain::plan::StepKind::AskUser);
    }

    #[tokio::test]
    async fn goal_already_achieved_short_circuits_to_conclude() {
        let llm = ScriptedLlmProvider::new(vec![]);
        let snap = snapshot(true, "the answer is 42");
        let step = decide(&llm, 1, "q", Some(&snap), &[], false, DecisionMode::Replan).await;
        assert_eq!(step.kind, qa_domain::plan::StepKind::Conclude);
        assert_eq!(step.conclusion, "the answer is 42");
    }

    #[tokio::test]
    async fn well_formed_code_response_builds_a_code_step() {
        let body = serde_json::json!({
            "kind": "CODE",
            "description": "search the web",
            "code": "result = web_search('x')"
        })
        .to_string();
        let llm = ScriptedLlmProvider::new(vec![ScriptedLlmProvider::text_response(body)]);
        let step = decide(&llm, 0, "q", None, &[], false, DecisionMode::Initial).await;
        assert_eq!(step.kind, qa_domain::plan::StepKind::Code);
        assert!(step.is_well_formed());
    }

    #[tokio::test]
    async fn malformed_response_falls_back_to_ask_user_not_a_panic() {
        let llm = ScriptedLlmProvider::new(vec![ScriptedLlmProvider::text_response("garbage")]);
        let step = decide(&llm, 0, "q", None, &[], false, DecisionMode::Initial).await;
        assert_eq!(step.kind, qa_domain::plan::StepKind::AskUser);
    }

    #[tokio::test]
    async fn conclude_without_text_is_rejected_as_malformed() {
        let body = serde_json::json!({"kind": "CONCLUDE", "conclusion": ""}).to_string();
        let llm = ScriptedLlmProvider::new(vec![ScriptedLlmProvider::text_response(body)]);
        let step = decide(&llm, 0, "q", None, &[], false, DecisionMode::Initial).await;
        assert_eq!(step.kind, qa_domain::plan::StepKind::AskUser);
    }
}

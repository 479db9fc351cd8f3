//! Perception Agent (C7): the critic that judges whether a goal is met.

use qa_domain::perception::{PerceptionKind, PerceptionSnapshot};
use qa_domain::tool::Message;
use qa_providers::{ChatRequest, LlmProvider};

const PERCEPTION_PROMPT: &str = r#"You are the perception agent of an advanced AI system.
Analyze the current state of the conversation and produce a structured snapshot.

Respond with exactly this JSON shape and nothing else:
{
  "entities": ["list", "of", "key", "entities"],
  "result_requirement": "what exactly the user wants, be specific",
  "original_goal_achieved": boolean,
  "reasoning": "why the goal is achieved or not",
  "local_goal_achieved": boolean,
  "local_reasoning": "why the most recent step succeeded or failed",
  "confidence": float between 0.0 and 1.0,
  "solution_summary": "a concise summary of the answer so far"
}

Be strict. Do not hallucinate success. If the tool output contains the
answer, set original_goal_achieved=true. If the most recent step failed,
set local_goal_achieved=false and explain why in local_reasoning."#;

#[derive(serde::Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    result_requirement: String,
    #[serde(default)]
    original_goal_achieved: bool,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    local_goal_achieved: bool,
    #[serde(default)]
    local_reasoning: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    solution_summary: String,
}

/// Runs one perception cycle against `raw_input` (the user query, or the
/// latest step's result text) plus a readable history projection.
pub async fn perceive(
    llm: &dyn LlmProvider,
    kind: PerceptionKind,
    raw_input: &str,
    history: &str,
) -> PerceptionSnapshot {
    let prompt = format!(
        "{PERCEPTION_PROMPT}\n\n--- CONTEXT ---\n{history}\n\n--- CURRENT INPUT ---\nType: {kind:?}\nContent: {raw_input}"
    );

    let request = ChatRequest {
        messages: vec![Message::system(PERCEPTION_PROMPT), Message::user(prompt)],
        json_mode: true,
        ..Default::default()
    };

    match llm.chat(request).await {
        Ok(response) => match serde_json::from_str::<RawSnapshot>(&response.content) {
            Ok(raw) => PerceptionSnapshot {
                // Defensive overwrite: `kind` always reflects what the caller
                // asked for, never whatever (if anything) the model echoed back.
                kind,
                entities: raw.entities,
                result_requirement: raw.result_requirement,
                original_goal_achieved: raw.original_goal_achieved,
                reasoning: raw.reasoning,
                local_goal_achieved: raw.local_goal_achieved,
                local_reasoning: raw.local_reasoning,
                confidence: raw.confidence,
                solution_summary: raw.solution_summary,
                require_ground_truth: false,
                timestamp: now(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "perception response failed to parse");
                PerceptionSnapshot::fallback(kind, &e.to_string())
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "perception LLM call failed");
            PerceptionSnapshot::fallback(kind, &e.to_string())
        }
    }
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qa_providers::fake::ScriptedLlmProvider;

    #[tokio::test]
    async fn well_formed_response_parses_into_snapshot() {
        let body = serde_json::json!({
            "entities": ["Paris"],
            "result_requirement": "capital of France",
            "original_goal_achieved": true,
            "reasoning": "answer found",
            "local_goal_achieved": true,
            "local_reasoning": "step succeeded",
            "confidence": 0.95,
            "solution_summary": "Paris is the capital of France."
        })
        .to_string();
        let llm = ScriptedLlmProvider::new(vec![ScriptedLlmProvider::text_response(body)]);
        let snapshot = perceive(&llm, PerceptionKind::UserQuery, "what is the capital of France?", "").await;
        assert!(snapshot.original_goal_achieved);
        assert_eq!(snapshot.confidence, 0.95);
        assert_eq!(snapshot.kind, PerceptionKind::UserQuery);
    }

    #[tokio::test]
    async fn malformed_response_never_panics_and_is_low_confidence() {
        let llm = ScriptedLlmProvider::new(vec![ScriptedLlmProvider::text_response("not json at all")]);
        let snapshot = perceive(&llm, PerceptionKind::StepResult, "x", "").await;
        assert!(snapshot.confidence < 0.5);
        assert!(!snapshot.reasoning.is_empty());
    }

    #[tokio::test]
    async fn kind_is_always_the_caller_supplied_value() {
        let llm = ScriptedLlmProvider::new(vec![ScriptedLlmProvider::text_response("{}".to_string())]);
        let snapshot = perceive(&llm, PerceptionKind::StepResult, "x", "").await;
        assert_eq!(snapshot.kind, PerceptionKind::StepResult);
    }
}

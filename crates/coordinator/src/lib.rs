//! `qa-coordinator` — the outer state machine (C10) that drives perception,
//! retrieval, planning, and execution against the blackboard (C9) until a
//! terminal conclusion, with optional human-in-the-loop gates.

pub mod io;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use qa_agents::{decide, perceive, DecisionMode};
use qa_domain::blackboard::{BlackboardState, ContextEntry};
use qa_domain::config::{CoordinatorConfig, ExecutorConfig as DomainExecutorConfig};
use qa_domain::perception::PerceptionKind;
use qa_domain::plan::{PlanStep, StepKind, StepStatus};
use qa_providers::{EmbeddingProvider, EmbeddingsRequest, LlmProvider};
use qa_retrieval::{SessionMemory, TieredRetriever};
use uuid::Uuid;

use io::{IoHandler, IoMessage};

/// How a coordinator run ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A conclusion was reached; `answer` is the text shown to the user.
    Done { answer: String },
    /// The user sent `"stop"` during a step-approval gate.
    Aborted { message: String },
    /// `max_steps` `ExecuteStep` entries were consumed without a conclusion.
    MaxStepsReached,
    /// An uncaught error ended the run; `message` is the deterministic
    /// user-facing text (see `qa_domain::error::Error::user_facing_message`).
    Failed { message: String },
}

/// Everything one coordinator run needs. Constructed once per query by the
/// caller (CLI, WebSocket handler, ...); the blackboard it's given is owned
/// exclusively for the run's lifetime.
pub struct Coordinator<'a> {
    pub llm: Arc<dyn LlmProvider>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub retriever: &'a TieredRetriever,
    pub multiplexer: Arc<qa_mcp_client::ToolMultiplexer>,
    pub tool_names: HashSet<String>,
    pub executor_config: DomainExecutorConfig,
    pub coordinator_config: CoordinatorConfig,
    pub index_root: PathBuf,
}

impl<'a> Coordinator<'a> {
    /// Run one query to completion.
    pub async fn run_query(
        &self,
        blackboard: &mut BlackboardState,
        session_memory: &mut SessionMemory,
        io: &dyn IoHandler,
    ) -> Outcome {
        match self.run_query_inner(blackboard, session_memory, io).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.user_facing_message();
                blackboard.log_failure(&blackboard.original_query.clone(), &e.to_string());
                io.emit(IoMessage::Error(message.clone())).await;
                Outcome::Failed { message }
            }
        }
    }

    async fn run_query_inner(
        &self,
        blackboard: &mut BlackboardState,
        session_memory: &mut SessionMemory,
        io: &dyn IoHandler,
    ) -> qa_domain::error::Result<Outcome> {
        let query = blackboard.original_query.clone();

        // ── PerceiveQuery ────────────────────────────────────────────
        let snapshot = perceive(self.llm.as_ref(), PerceptionKind::UserQuery, &query, "").await;
        io.emit(IoMessage::Perception { reasoning: snapshot.reasoning.clone(), confidence: snapshot.confidence }).await;
        let already_satisfied = snapshot.original_goal_achieved;
        let summary = snapshot.solution_summary.clone();
        blackboard.update_perception(snapshot.clone());

        if already_satisfied {
            io.emit(IoMessage::Answer(summary.clone())).await;
            return Ok(Outcome::Done { answer: summary });
        }

        // ── Retrieve ─────────────────────────────────────────────────
        let retrieval = self.retriever.retrieve(&query, session_memory).await?;
        io.emit(IoMessage::Retrieval { source: retrieval.source.as_tag().to_string() }).await;
        if !retrieval.text.is_empty() {
            blackboard.context_data.insert(
                "retrieval".to_string(),
                ContextEntry { text: retrieval.text, source: retrieval.source.as_tag().to_string(), require_ground_truth: false },
            );
        }

        // ── PlanInitial ──────────────────────────────────────────────
        let context: Vec<ContextEntry> = blackboard.context_data.values().cloned().collect();
        let mut step = decide(self.llm.as_ref(), 0, &query, Some(&snapshot), &context, false, DecisionMode::Initial).await;
        blackboard.add_plan_version(vec![step.clone()])?;

        // ── ApprovePlan ──────────────────────────────────────────────
        if blackboard.hitl_config.require_plan_approval {
            loop {
                io.emit(IoMessage::Plan { description: step.description.clone(), index: step.step_index }).await;
                let response = io.request_hitl(&step.description).await;
                if response.is_empty() {
                    break;
                }
                blackboard.user_feedback.push(response);
                let context: Vec<ContextEntry> = blackboard.context_data.values().cloned().collect();
                step = decide(self.llm.as_ref(), step.step_index, &query, Some(&snapshot), &context, false, DecisionMode::Replan).await;
                blackboard.add_plan_version(vec![step.clone()])?;
            }
        }

        // ── ExecuteStep loop ─────────────────────────────────────────
        let mut steps_run = 0usize;
        let mut last_perception = snapshot;

        loop {
            if steps_run >= self.coordinator_config.max_steps {
                return Ok(Outcome::MaxStepsReached);
            }
            steps_run += 1;

            let current_index = step.step_index;

            if blackboard.hitl_config.require_step_approval {
                io.emit(IoMessage::Step { description: step.description.clone(), index: current_index }).await;
                let response = io.request_hitl(&step.description).await;
                match response.as_str() {
                    "" => {}
                    "skip" => {
                        blackboard.update_step(current_index, |s| {
                            s.status = StepStatus::Skipped;
                            s.execution_result = Some("Skipped by user".to_string());
                        })?;
                        step = self.replan(&query, Some(&last_perception), blackboard, current_index, false).await?;
                        continue;
                    }
                    "stop" => {
                        return Ok(Outcome::Aborted { message: "Execution Aborted by User".to_string() });
                    }
                    other => {
                        blackboard.user_feedback.push(other.to_string());
                    }
                }
            }

            match step.kind {
                StepKind::Conclude => {
                    blackboard.update_step(current_index, |s| s.status = StepStatus::Completed)?;
                    return Ok(self.conclude(blackboard, session_memory, &query, step.conclusion.clone(), last_perception.confidence, "decision").await);
                }
                StepKind::AskUser => {
                    io.emit(IoMessage::HitlRequest { prompt: step.description.clone() }).await;
                    let response = io.request_hitl(&step.description).await;
                    blackboard.user_feedback.push(response);
                    blackboard.update_step(current_index, |s| s.status = StepStatus::Completed)?;
                    step = self.replan(&query, Some(&last_perception), blackboard, current_index, false).await?;
                    continue;
                }
                StepKind::Nop => {
                    blackboard.update_step(current_index, |s| s.status = StepStatus::Completed)?;
                    step = self.replan(&query, Some(&last_perception), blackboard, current_index, false).await?;
                    continue;
                }
                StepKind::Code => {
                    let outcome = qa_executor::run_snippet(
                        &step.code,
                        &self.tool_names,
                        self.multiplexer.clone(),
                        &executor_config(&self.executor_config),
                    )
                    .await;

                    // Only a ToolError forces ASK_USER; ParseError, a budget
                    // overrun, or a timeout simply fail the step and replan.
                    let is_tool_error = outcome.status == qa_executor::ExecutionStatus::Error
                        && outcome.error.as_deref().map(|e| e.contains("tool error")).unwrap_or(false);

                    blackboard.update_step(current_index, |s| {
                        s.attempts += 1;
                        s.execution_time = Some(outcome.total_time.as_secs_f64());
                        match &outcome.status {
                            qa_executor::ExecutionStatus::Success => {
                                s.status = StepStatus::Completed;
                                s.execution_result = outcome.result.clone();
                            }
                            qa_executor::ExecutionStatus::Error => {
                                s.status = StepStatus::Failed;
                                s.execution_result = outcome.error.clone();
                            }
                        }
                    })?;

                    if is_tool_error {
                        io.emit(IoMessage::Decision { kind: "ASK_USER".to_string(), description: "a tool call failed and will not be retried".to_string() }).await;
                        step = self.replan(&query, Some(&last_perception), blackboard, current_index, true).await?;
                        continue;
                    }

                    let result_text = outcome.result.clone().or(outcome.error.clone()).unwrap_or_default();
                    let step_perception = perceive(
                        self.llm.as_ref(),
                        PerceptionKind::StepResult,
                        &format!("Step: {}\nResult: {result_text}", step.description),
                        "",
                    )
                    .await;
                    io.emit(IoMessage::Perception { reasoning: step_perception.reasoning.clone(), confidence: step_perception.confidence }).await;

                    if step_perception.original_goal_achieved {
                        let answer = step_perception.solution_summary.clone();
                        let confidence = step_perception.confidence;
                        blackboard.update_perception(step_perception);
                        return Ok(self.conclude(blackboard, session_memory, &query, answer, confidence, "execution").await);
                    }

                    // A non-tool execution error (parse/budget/timeout) fails
                    // the step and replans normally; it does not force
                    // ASK_USER the way a persistent tool failure does.
                    last_perception = step_perception.clone();
                    blackboard.update_perception(step_perception.clone());
                    step = self.replan(&query, Some(&step_perception), blackboard, current_index, false).await?;
                }
            }
        }
    }

    async fn replan(
        &self,
        query: &str,
        perception: Option<&qa_domain::perception::PerceptionSnapshot>,
        blackboard: &mut BlackboardState,
        last_index: u32,
        last_step_failed: bool,
    ) -> qa_domain::error::Result<PlanStep> {
        let context: Vec<ContextEntry> = blackboard.context_data.values().cloned().collect();
        let next = decide(self.llm.as_ref(), last_index + 1, query, perception, &context, last_step_failed, DecisionMode::Replan).await;
        blackboard.append_step(next.clone())?;
        Ok(next)
    }

    /// The shared terminal sequence: write `final_answer`, persist Tier-1,
    /// attempt Tier-2 promotion, save a debug snapshot.
    async fn conclude(
        &self,
        blackboard: &mut BlackboardState,
        session_memory: &mut SessionMemory,
        query: &str,
        answer: String,
        confidence: f32,
        source: &str,
    ) -> Outcome {
        blackboard.final_answer = Some(answer.clone());

        if let Ok(query_embedding) = self.embed(query).await {
            if let Ok(answer_embedding) = self.embed(&answer).await {
                if let Err(e) = session_memory.add_turn(
                    query.to_string(),
                    answer.clone(),
                    confidence,
                    source.to_string(),
                    query_embedding,
                    answer_embedding,
                    None,
                ) {
                    tracing::warn!(error = %e, "failed to persist tier-1 turn");
                }
            }
        }

        if let Err(e) = self
            .retriever
            .try_promote(query, &answer, confidence, source, blackboard.session_id, true)
            .await
        {
            tracing::warn!(error = %e, "tier-2 promotion attempt failed");
        }

        save_debug_snapshot(&self.index_root, blackboard);

        Outcome::Done { answer }
    }

    async fn embed(&self, text: &str) -> qa_domain::error::Result<Vec<f32>> {
        let resp = self.embeddings.embed(EmbeddingsRequest { input: vec![text.to_string()], model: None }).await?;
        Ok(resp.embeddings.into_iter().next().unwrap_or_default())
    }
}

fn executor_config(cfg: &DomainExecutorConfig) -> qa_executor::ExecutorConfig {
    qa_executor::ExecutorConfig {
        max_operations: cfg.max_operations,
        per_call_budget: Duration::from_secs(cfg.per_call_budget_secs),
        min_timeout: Duration::from_secs(cfg.min_timeout_secs),
    }
}

/// Best-effort debug snapshot of the blackboard at conclusion time. Failures
/// are logged, never propagated: this is diagnostic, not part of the
/// coordinator's success path.
fn save_debug_snapshot(index_root: &Path, blackboard: &BlackboardState) {
    let dir = index_root.join("debug");
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(error = %e, "failed to create debug snapshot directory");
        return;
    }
    let path = dir.join(format!("session_{}.json", blackboard.session_id));
    match serde_json::to_vec_pretty(&blackboard.snapshot()) {
        Ok(bytes) => {
            if let Err(e) = std::fs::write(&path, bytes) {
                tracing::warn!(error = %e, path = %path.display(), "failed to write debug snapshot");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to serialize debug snapshot"),
    }
}

/// Convenience constructor mirroring `SessionMemory::load_or_new` + a fresh
/// blackboard, for callers starting a brand new session.
pub fn new_session(index_root: &Path, query: impl Into<String>, hitl_config: qa_domain::blackboard::HitlConfig) -> (Uuid, BlackboardState) {
    let session_id = Uuid::new_v4();
    (session_id, BlackboardState::new(session_id, query, hitl_config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use io::{AutoApproveIo, ScriptedIo};
    use qa_domain::blackboard::HitlConfig;
    use qa_domain::config::RetrievalConfig;
    use qa_providers::fake::{DeterministicEmbeddingProvider, ScriptedLlmProvider};

    fn perception_json(goal_achieved: bool, summary: &str) -> String {
        serde_json::json!({
            "entities": [],
            "result_requirement": "",
            "original_goal_achieved": goal_achieved,
            "reasoning": "because",
            "local_goal_achieved": goal_achieved,
            "local_reasoning": "",
            "confidence": 0.95,
            "solution_summary": summary
        })
        .to_string()
    }

    fn decision_code_json(code: &str) -> String {
        serde_json::json!({"kind": "CODE", "description": "do it", "code": code}).to_string()
    }

    fn test_retrieval_config() -> RetrievalConfig {
        RetrievalConfig { embedding_dimension: 16, ..RetrievalConfig::default() }
    }

    fn build_coordinator<'a>(responses: Vec<String>, dir: &std::path::Path, retriever: &'a TieredRetriever, max_steps: usize) -> Coordinator<'a> {
        let llm: Arc<dyn LlmProvider> =
            Arc::new(ScriptedLlmProvider::new(responses.into_iter().map(ScriptedLlmProvider::text_response).collect()));
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(DeterministicEmbeddingProvider::new(16));
        Coordinator {
            llm,
            embeddings,
            retriever,
            multiplexer: Arc::new(qa_mcp_client::ToolMultiplexer::empty()),
            tool_names: HashSet::new(),
            executor_config: DomainExecutorConfig::default(),
            coordinator_config: CoordinatorConfig { max_steps },
            index_root: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn perceive_query_goal_already_achieved_short_circuits_to_done() {
        let dir = tempfile::tempdir().unwrap();
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(DeterministicEmbeddingProvider::new(16));
        let retriever = TieredRetriever::open(dir.path(), test_retrieval_config(), embeddings).unwrap();
        let coordinator = build_coordinator(vec![perception_json(true, "already known")], dir.path(), &retriever, 20);

        let (session_id, mut bb) = new_session(dir.path(), "what is 1+1?", HitlConfig::default());
        let mut session_memory = SessionMemory::load_or_new(dir.path(), session_id).unwrap();
        let outcome = coordinator.run_query(&mut bb, &mut session_memory, &AutoApproveIo).await;

        match outcome {
            Outcome::Done { answer } => assert_eq!(answer, "already known"),
            other => panic!("expected Done, got {other:?}"),
        }
        assert!(session_memory.is_empty(), "short-circuit before any step executes promotes nothing to tier-1");
    }

    #[tokio::test]
    async fn code_step_concludes_once_perception_reports_goal_achieved() {
        let dir = tempfile::tempdir().unwrap();
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(DeterministicEmbeddingProvider::new(16));
        let retriever = TieredRetriever::open(dir.path(), test_retrieval_config(), embeddings).unwrap();
        let responses = vec![
            perception_json(false, ""),
            decision_code_json("result = 1 + 1"),
            perception_json(true, "2"),
        ];
        let coordinator = build_coordinator(responses, dir.path(), &retriever, 20);

        let (session_id, mut bb) = new_session(dir.path(), "what is 1+1?", HitlConfig::default());
        let mut session_memory = SessionMemory::load_or_new(dir.path(), session_id).unwrap();
        let outcome = coordinator.run_query(&mut bb, &mut session_memory, &AutoApproveIo).await;

        match outcome {
            Outcome::Done { answer } => assert_eq!(answer, "2"),
            other => panic!("expected Done, got {other:?}"),
        }
        assert_eq!(bb.final_answer.as_deref(), Some("2"));
        assert_eq!(session_memory.len(), 1, "a successful conclusion persists one tier-1 turn");
    }

    #[tokio::test]
    async fn max_steps_bound_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(DeterministicEmbeddingProvider::new(16));
        let retriever = TieredRetriever::open(dir.path(), test_retrieval_config(), embeddings).unwrap();
        let responses = vec![
            perception_json(false, ""),
            decision_code_json("result = 1"),
            perception_json(false, ""),
            decision_code_json("result = 1"),
        ];
        let coordinator = build_coordinator(responses, dir.path(), &retriever, 1);

        let (session_id, mut bb) = new_session(dir.path(), "an unanswerable question", HitlConfig::default());
        let mut session_memory = SessionMemory::load_or_new(dir.path(), session_id).unwrap();
        let outcome = coordinator.run_query(&mut bb, &mut session_memory, &AutoApproveIo).await;

        assert!(matches!(outcome, Outcome::MaxStepsReached));
    }

    #[tokio::test]
    async fn stop_response_during_step_approval_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(DeterministicEmbeddingProvider::new(16));
        let retriever = TieredRetriever::open(dir.path(), test_retrieval_config(), embeddings).unwrap();
        let responses = vec![perception_json(false, ""), decision_code_json("result = 1")];
        let coordinator = build_coordinator(responses, dir.path(), &retriever, 20);

        let hitl_config = HitlConfig { require_plan_approval: false, require_step_approval: true };
        let (session_id, mut bb) = new_session(dir.path(), "do something risky", hitl_config);
        let mut session_memory = SessionMemory::load_or_new(dir.path(), session_id).unwrap();
        let io = ScriptedIo::new(vec!["stop"]);
        let outcome = coordinator.run_query(&mut bb, &mut session_memory, &io).await;

        match outcome {
            Outcome::Aborted { message } => assert_eq!(message, "Execution Aborted by User"),
            other => panic!("expected Aborted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn skip_response_marks_the_step_skipped_and_replans() {
        let dir = tempfile::tempdir().unwrap();
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(DeterministicEmbeddingProvider::new(16));
        let retriever = TieredRetriever::open(dir.path(), test_retrieval_config(), embeddings).unwrap();
        let responses = vec![
            perception_json(false, ""),
            decision_code_json("result = 1"),
            decision_code_json("result = 2"),
            perception_json(true, "2"),
        ];
        let coordinator = build_coordinator(responses, dir.path(), &retriever, 20);

        let hitl_config = HitlConfig { require_plan_approval: false, require_step_approval: true };
        let (session_id, mut bb) = new_session(dir.path(), "do something", hitl_config);
        let mut session_memory = SessionMemory::load_or_new(dir.path(), session_id).unwrap();
        let io = ScriptedIo::new(vec!["skip", ""]);
        let outcome = coordinator.run_query(&mut bb, &mut session_memory, &io).await;

        assert!(matches!(outcome, Outcome::Done { .. }));
        assert_eq!(bb.current_plan()[0].status, StepStatus::Skipped);
    }
}

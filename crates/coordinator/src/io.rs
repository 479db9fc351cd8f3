//! The coordinator's IO boundary: every user-visible event the state machine
//! produces, and the single point where it blocks on a human response.
//!
//! Grounded on the turn loop's event channel: callers get a uniform stream
//! of tagged messages rather than bespoke callbacks per state.

use serde::Serialize;

/// One user-visible event emitted by a coordinator run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum IoMessage {
    Log(String),
    Step { description: String, index: u32 },
    Plan { description: String, index: u32 },
    Answer(String),
    Error(String),
    Perception { reasoning: String, confidence: f32 },
    Retrieval { source: String },
    Decision { kind: String, description: String },
    HitlRequest { prompt: String },
}

/// The human-in-the-loop surface: emits events and blocks on a response
/// when a gate is reached. Reserved response tokens are `""` (approve),
/// `"skip"`, and `"stop"`; any other text is free-form feedback.
#[async_trait::async_trait]
pub trait IoHandler: Send + Sync {
    async fn emit(&self, message: IoMessage);

    /// Block until the human answers the prompt just emitted via
    /// `HitlRequest`. Returns the raw response string.
    async fn request_hitl(&self, prompt: &str) -> String;
}

/// A non-interactive handler for tests and headless runs: every gate is
/// auto-approved (empty response) and every message is dropped. Swap in a
/// real CLI/WebSocket handler for an interactive run.
pub struct AutoApproveIo;

#[async_trait::async_trait]
impl IoHandler for AutoApproveIo {
    async fn emit(&self, _message: IoMessage) {}

    async fn request_hitl(&self, _prompt: &str) -> String {
        String::new()
    }
}

/// Records every emitted message and returns scripted responses to HITL
/// prompts in order, for deterministic tests of the approval/ask-user
/// branches.
#[cfg(any(test, feature = "test-util"))]
pub struct ScriptedIo {
    pub emitted: parking_lot::Mutex<Vec<IoMessage>>,
    pub responses: parking_lot::Mutex<Vec<String>>,
}

#[cfg(any(test, feature = "test-util"))]
impl ScriptedIo {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            emitted: parking_lot::Mutex::new(Vec::new()),
            responses: parking_lot::Mutex::new(responses.into_iter().map(String::from).collect()),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait::async_trait]
impl IoHandler for ScriptedIo {
    async fn emit(&self, message: IoMessage) {
        self.emitted.lock().push(message);
    }

    async fn request_hitl(&self, _prompt: &str) -> String {
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            String::new()
        } else {
            responses.remove(0)
        }
    }
}

/// Shared error type used across the orchestrator crates.
///
/// Variants mirror the error taxonomy in the coordinator's error-handling
/// design: each carries enough detail for its disposition (replan, retry,
/// abort) to be decided by the caller rather than by this type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("embedding error: {0}")]
    EmbeddingError(String),

    #[error("LLM error from {provider}: {message}")]
    LlmError { provider: String, message: String },

    #[error("blackboard invariant violated: {0}")]
    BlackboardInvariant(String),

    #[error("tool server '{0}' is down")]
    ToolServerDown(String),

    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The deterministic user-facing message the coordinator emits when a
    /// run terminates without a conclusion.
    pub fn user_facing_message(&self) -> String {
        let text = self.to_string();
        if text.contains("429") || text.contains("RESOURCE_EXHAUSTED") {
            "The system is experiencing high traffic right now. Please try again shortly.".to_string()
        } else {
            format!("An unexpected error occurred: {text}")
        }
    }
}

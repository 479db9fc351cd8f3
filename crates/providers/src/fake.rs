//! In-memory test doubles for [`LlmProvider`] and [`EmbeddingProvider`].
//!
//! The design notes call for substituting fakes at construction time rather
//! than reaching for ambient globals; these are that substitution point for
//! the rest of the workspace's tests.

use std::sync::Mutex;

use qa_domain::capability::LlmCapabilities;
use qa_domain::error::Result;

use crate::traits::{ChatRequest, ChatResponse, EmbeddingProvider, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};

/// An `LlmProvider` that returns a fixed queue of scripted responses, one per
/// call, in order. Panics (via an error) if the queue is exhausted.
pub struct ScriptedLlmProvider {
    responses: Mutex<Vec<ChatResponse>>,
    capabilities: LlmCapabilities,
}

impl ScriptedLlmProvider {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self { responses: Mutex::new(responses), capabilities: LlmCapabilities::default() }
    }

    pub fn text_response(text: impl Into<String>) -> ChatResponse {
        ChatResponse { content: text.into(), tool_calls: Vec::new(), model: "fake-model".into(), finish_reason: Some("stop".into()) }
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlmProvider {
    async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
        let mut queue = self.responses.lock().unwrap();
        if queue.is_empty() {
            return Err(qa_domain::error::Error::LlmError {
                provider: "fake".into(),
                message: "scripted response queue exhausted".into(),
            });
        }
        Ok(queue.remove(0))
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        "fake"
    }
}

/// An `EmbeddingProvider` producing deterministic vectors from a text hash,
/// so semantically unrelated strings get near-orthogonal vectors and
/// repeated calls on the same text are reproducible.
pub struct DeterministicEmbeddingProvider {
    dimension: usize,
}

impl DeterministicEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut state: u64 = 1469598103934665603; // FNV offset basis
        let mut out = vec![0f32; self.dimension];
        for (i, byte) in text.bytes().enumerate() {
            state ^= byte as u64;
            state = state.wrapping_mul(1099511628211);
            out[i % self.dimension] += ((state % 2003) as f32 / 2003.0) - 0.5;
        }
        let norm: f32 = out.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in out.iter_mut() {
                *v /= norm;
            }
        }
        out
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for DeterministicEmbeddingProvider {
    async fn embed(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        Ok(EmbeddingsResponse { embeddings: req.input.iter().map(|t| self.embed_one(t)).collect() })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_embeddings_are_reproducible() {
        let provider = DeterministicEmbeddingProvider::new(16);
        let a = provider.embed(EmbeddingsRequest { input: vec!["hello".into()], model: None }).await.unwrap();
        let b = provider.embed(EmbeddingsRequest { input: vec!["hello".into()], model: None }).await.unwrap();
        assert_eq!(a.embeddings, b.embeddings);
    }

    #[tokio::test]
    async fn different_text_yields_different_vectors() {
        let provider = DeterministicEmbeddingProvider::new(16);
        let resp = provider
            .embed(EmbeddingsRequest { input: vec!["hello".into(), "goodbye".into()], model: None })
            .await
            .unwrap();
        assert_ne!(resp.embeddings[0], resp.embeddings[1]);
    }

    #[tokio::test]
    async fn scripted_provider_returns_queued_responses_in_order() {
        let provider = ScriptedLlmProvider::new(vec![
            ScriptedLlmProvider::text_response("first"),
            ScriptedLlmProvider::text_response("second"),
        ]);
        let r1 = provider.chat(ChatRequest::default()).await.unwrap();
        let r2 = provider.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(r1.content, "first");
        assert_eq!(r2.content, "second");
    }

    #[tokio::test]
    async fn exhausted_queue_is_an_error_not_a_panic() {
        let provider = ScriptedLlmProvider::new(vec![]);
        assert!(provider.chat(ChatRequest::default()).await.is_err());
    }
}

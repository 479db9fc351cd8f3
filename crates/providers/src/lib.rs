//! `qa-providers` — contracts for the two external collaborators the
//! orchestrator reasons against: the LLM API client and the embedding
//! service. Concrete vendor adapters are out of scope; this crate fixes the
//! shape callers depend on, plus test doubles for exercising the rest of
//! the system without a network dependency.

pub mod traits;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use traits::{ChatRequest, ChatResponse, EmbeddingProvider, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};

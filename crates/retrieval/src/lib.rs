//! `qa-retrieval` — the tiered memory & retrieval subsystem: the persisted
//! vector index store (C2), the tiered retriever (C4), and the per-session
//! Q&A cache (C5).

pub mod session_memory;
pub mod tiered_retriever;
pub mod vector_index;

pub use session_memory::{SessionMatch, SessionMemory};
pub use tiered_retriever::{RetrievalResult, RetrievalSource, TieredRetriever};
pub use vector_index::{cosine_similarity, VectorIndex};

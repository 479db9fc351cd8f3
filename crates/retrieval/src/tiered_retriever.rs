//! Tiered retriever (C4): Session → Cross-session → Document cascade.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use qa_domain::config::RetrievalConfig;
use qa_domain::error::Result;
use qa_domain::memory::{contains_freshness_keyword, DocumentChunk, MemoryEntry, SourceClass};
use qa_providers::{EmbeddingProvider, EmbeddingsRequest};
use uuid::Uuid;

use crate::session_memory::SessionMemory;
use crate::vector_index::VectorIndex;

/// Which tier (if any) answered a retrieval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalSource {
    Session,
    Memory,
    Documents,
    None,
}

impl RetrievalSource {
    pub fn as_tag(&self) -> &'static str {
        match self {
            RetrievalSource::Session => "session",
            RetrievalSource::Memory => "memory",
            RetrievalSource::Documents => "documents",
            RetrievalSource::None => "none",
        }
    }
}

/// Context gathered for one query, ready to drop into a blackboard's
/// `context_data`.
pub struct RetrievalResult {
    pub text: String,
    pub source: RetrievalSource,
}

/// Owns the Tier-2 and Tier-3 indices plus the embedding client; one
/// instance is shared across sessions (its indices are cross-session),
/// while [`SessionMemory`] is constructed per session by the caller.
pub struct TieredRetriever {
    embeddings: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
    memory_index: Mutex<VectorIndex<MemoryEntry>>,
    document_index: Mutex<VectorIndex<DocumentChunk>>,
}

impl TieredRetriever {
    pub fn open(index_root: &Path, config: RetrievalConfig, embeddings: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let memory_index = VectorIndex::open_or_create(&index_root.join("memory"), config.embedding_dimension)?;
        let document_index = VectorIndex::open_or_create(&index_root.join("documents"), config.embedding_dimension)?;
        Ok(Self {
            embeddings,
            config,
            memory_index: Mutex::new(memory_index),
            document_index: Mutex::new(document_index),
        })
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let resp = self.embeddings.embed(EmbeddingsRequest { input: vec![text.to_string()], model: None }).await?;
        Ok(resp.embeddings.into_iter().next().unwrap_or_default())
    }

    /// Run the full Session → Memory → Document cascade for `query`,
    /// short-circuiting at the first qualifying tier.
    pub async fn retrieve(&self, query: &str, session_memory: &SessionMemory) -> Result<RetrievalResult> {
        let query_embedding = self.embed_one(query).await?;

        if let Some(hit) = session_memory.search_similar(&query_embedding) {
            tracing::info!(turn_id = hit.turn.turn_id, similarity = hit.similarity, "tier-1 session hit");
            return Ok(RetrievalResult {
                text: format!("Session Memory (Turn {}):\n{}", hit.turn.turn_id, hit.turn.answer),
                source: RetrievalSource::Session,
            });
        }

        if let Some(entry) = self.search_memory_tier(query, &query_embedding) {
            tracing::info!(confidence = entry.confidence, source = %entry.source, "tier-2 memory hit");
            return Ok(RetrievalResult {
                text: format!("Memory (Cached):\n{}", entry.answer),
                source: RetrievalSource::Memory,
            });
        }

        let chunks = self.search_document_tier(&query_embedding);
        if chunks.is_empty() {
            return Ok(RetrievalResult { text: String::new(), source: RetrievalSource::None });
        }
        let text = chunks
            .iter()
            .map(|c| format!("{}\n[Source: {}, ID: {}]", c.text, c.doc_name, c.chunk_id))
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(RetrievalResult { text: format!("Local Documents:\n{text}"), source: RetrievalSource::Documents })
    }

    fn search_memory_tier(&self, query: &str, query_embedding: &[f32]) -> Option<MemoryEntry> {
        let index = self.memory_index.lock();
        let candidates = index.search(query_embedding, self.config.memory_top_k);
        for (_distance, entry) in candidates {
            if is_memory_entry_valid(entry, query) {
                return Some(entry.clone());
            }
        }
        None
    }

    fn search_document_tier(&self, query_embedding: &[f32]) -> Vec<DocumentChunk> {
        let index = self.document_index.lock();
        index.search(query_embedding, self.config.document_top_k).into_iter().map(|(_, c)| c.clone()).collect()
    }

    /// Tier-2 write path: consider promoting a successfully answered query.
    /// No-op (returns `Ok(false)`) if the promotion gate rejects the answer.
    pub async fn try_promote(
        &self,
        query: &str,
        answer: &str,
        confidence: f32,
        source: &str,
        session_id: Uuid,
        goal_achieved: bool,
    ) -> Result<bool> {
        if !should_promote(confidence, source, answer, goal_achieved) {
            return Ok(false);
        }
        let embedding = self.embed_one(query).await?;
        let source_class = classify_source(source);
        let entry = MemoryEntry {
            query: query.to_string(),
            answer: answer.to_string(),
            confidence,
            source: source.to_string(),
            timestamp: Utc::now(),
            ttl_hours: source_class.ttl_hours(),
            session_id: session_id.to_string(),
        };
        self.memory_index.lock().push(embedding, entry)?;
        Ok(true)
    }
}

fn classify_source(source: &str) -> SourceClass {
    let lower = source.to_lowercase();
    if lower.contains("web") {
        SourceClass::Web
    } else if lower.contains("document") || lower.contains("rag") || lower.contains("local") {
        SourceClass::Document
    } else {
        SourceClass::Other
    }
}

/// Tier-2 validation cascade (spec §4.4's per-candidate rule table).
fn is_memory_entry_valid(entry: &MemoryEntry, query: &str) -> bool {
    if entry.confidence < 0.9 {
        return false;
    }
    let age_hours = entry.age_hours(Utc::now());
    if age_hours > entry.ttl_hours {
        return false;
    }
    let source_class = classify_source(&entry.source);
    if source_class == SourceClass::Web && age_hours > 24.0 {
        return false;
    }
    if contains_freshness_keyword(query) && age_hours > 1.0 {
        return false;
    }
    true
}

const ERROR_INDICATORS: &[&str] = &["error", "failed", "not found", "could not", "unable to"];

/// Tier-2 promotion gate (spec §4.4 indexing rules).
fn should_promote(confidence: f32, source: &str, answer: &str, goal_achieved: bool) -> bool {
    if !goal_achieved {
        return false;
    }
    if confidence < 0.9 {
        return false;
    }
    if answer.len() < 20 {
        return false;
    }
    let lower_answer = answer.to_lowercase();
    if ERROR_INDICATORS.iter().any(|kw| lower_answer.contains(kw)) {
        return false;
    }
    let source_class = classify_source(source);
    if source_class == SourceClass::Web {
        return confidence >= 0.95;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_requires_goal_achieved() {
        assert!(!should_promote(0.99, "documents", "a long enough valid answer here", false));
    }

    #[test]
    fn promotion_rejects_short_answers() {
        assert!(!should_promote(0.99, "documents", "too short", true));
    }

    #[test]
    fn promotion_rejects_error_indicators() {
        assert!(!should_promote(0.99, "documents", "the tool call failed unexpectedly here", true));
    }

    #[test]
    fn web_sourced_promotion_needs_higher_confidence() {
        assert!(!should_promote(0.9, "web_search", "a long enough valid answer here", true));
        assert!(should_promote(0.96, "web_search", "a long enough valid answer here", true));
    }

    #[test]
    fn document_sourced_promotion_accepts_base_threshold() {
        assert!(should_promote(0.9, "documents", "a long enough valid answer here", true));
    }

    #[test]
    fn memory_entry_rejects_low_confidence() {
        let entry = MemoryEntry {
            query: "q".into(),
            answer: "a".into(),
            confidence: 0.5,
            source: "documents".into(),
            timestamp: Utc::now(),
            ttl_hours: 168.0,
            session_id: "s".into(),
        };
        assert!(!is_memory_entry_valid(&entry, "q"));
    }

    #[test]
    fn memory_entry_rejects_expired_ttl() {
        let entry = MemoryEntry {
            query: "q".into(),
            answer: "a".into(),
            confidence: 0.95,
            source: "documents".into(),
            timestamp: Utc::now() - chrono::Duration::hours(200),
            ttl_hours: 168.0,
            session_id: "s".into(),
        };
        assert!(!is_memory_entry_valid(&entry, "q"));
    }

    #[test]
    fn memory_entry_rejects_stale_web_result_past_24h() {
        let entry = MemoryEntry {
            query: "q".into(),
            answer: "a".into(),
            confidence: 0.97,
            source: "web_search".into(),
            timestamp: Utc::now() - chrono::Duration::hours(30),
            ttl_hours: 168.0,
            session_id: "s".into(),
        };
        assert!(!is_memory_entry_valid(&entry, "q"));
    }

    #[test]
    fn memory_entry_rejects_on_freshness_keyword_when_stale() {
        let entry = MemoryEntry {
            query: "q".into(),
            answer: "a".into(),
            confidence: 0.95,
            source: "documents".into(),
            timestamp: Utc::now() - chrono::Duration::hours(2),
            ttl_hours: 168.0,
            session_id: "s".into(),
        };
        assert!(!is_memory_entry_valid(&entry, "what is the current version"));
        assert!(is_memory_entry_valid(&entry, "what version is this"));
    }
}

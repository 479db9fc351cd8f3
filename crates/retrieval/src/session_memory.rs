//! In-conversation Q&A store with embedding-based similarity search (C5).
//!
//! Persisted at `memory/session_<session_id>.json`, one file per session.
//! Unlike the Tier-2/Tier-3 indices this is owned entirely by one
//! coordinator run and never shared, so there's no need for the
//! `VectorIndex` sidecar layout — the turns and their embeddings travel
//! together in a single file.

use std::path::{Path, PathBuf};

use chrono::Utc;
use qa_domain::error::{Error, Result};
use qa_domain::memory::SessionTurn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vector_index::cosine_similarity;

const SIMILARITY_THRESHOLD: f32 = 0.85;
const CONFIDENCE_FLOOR: f32 = 0.9;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTurn {
    turn: SessionTurn,
    query_embedding: Vec<f32>,
    answer_embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    session_id: Uuid,
    created_at: chrono::DateTime<Utc>,
    turns: Vec<StoredTurn>,
}

/// A match returned by [`SessionMemory::search_similar`].
pub struct SessionMatch {
    pub turn: SessionTurn,
    pub similarity: f32,
}

/// Short-term, per-session Q&A cache (Tier 1).
pub struct SessionMemory {
    path: PathBuf,
    session_id: Uuid,
    created_at: chrono::DateTime<Utc>,
    turns: Vec<StoredTurn>,
}

impl SessionMemory {
    /// Load the session file for `session_id` under `<index_root>/memory`, or
    /// start a fresh empty session if none exists yet.
    pub fn load_or_new(index_root: &Path, session_id: Uuid) -> Result<Self> {
        let dir = index_root.join("memory");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;
        let path = dir.join(format!("session_{session_id}.json"));

        if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            let file: SessionFile = serde_json::from_str(&raw)?;
            tracing::info!(session_id = %session_id, turns = file.turns.len(), "loaded session memory");
            return Ok(Self { path, session_id, created_at: file.created_at, turns: file.turns });
        }

        Ok(Self { path, session_id, created_at: Utc::now(), turns: Vec::new() })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append a validated turn and persist. Returns the assigned `turn_id`.
    pub fn add_turn(
        &mut self,
        query: String,
        answer: String,
        confidence: f32,
        source: String,
        query_embedding: Vec<f32>,
        answer_embedding: Vec<f32>,
        context_from_turn: Option<usize>,
    ) -> Result<usize> {
        let turn_id = self.turns.len();
        let turn = SessionTurn {
            turn_id,
            query,
            answer,
            confidence,
            source,
            timestamp: Utc::now(),
            validated: true,
            context_from_turn,
        };
        self.turns.push(StoredTurn { turn, query_embedding, answer_embedding });
        self.save()?;
        Ok(turn_id)
    }

    /// Tier-1 search: highest `max(sim(q, turn.query), sim(q, turn.answer))`
    /// among validated, high-confidence turns, provided it clears
    /// [`SIMILARITY_THRESHOLD`].
    pub fn search_similar(&self, query_embedding: &[f32]) -> Option<SessionMatch> {
        let mut best: Option<SessionMatch> = None;

        for stored in &self.turns {
            if !stored.turn.validated || stored.turn.confidence < CONFIDENCE_FLOOR {
                continue;
            }
            let query_sim = cosine_similarity(query_embedding, &stored.query_embedding);
            let answer_sim = cosine_similarity(query_embedding, &stored.answer_embedding);
            let similarity = query_sim.max(answer_sim);

            if similarity < SIMILARITY_THRESHOLD {
                continue;
            }
            if best.as_ref().map(|b| similarity > b.similarity).unwrap_or(true) {
                best = Some(SessionMatch { turn: stored.turn.clone(), similarity });
            }
        }

        best
    }

    fn save(&self) -> Result<()> {
        let file = SessionFile { session_id: self.session_id, created_at: self.created_at, turns: self.turns.clone() };
        std::fs::write(&self.path, serde_json::to_vec_pretty(&file)?).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_vec(angle_deg: f32) -> Vec<f32> {
        let rad = angle_deg.to_radians();
        vec![rad.cos(), rad.sin()]
    }

    #[test]
    fn no_match_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut mem = SessionMemory::load_or_new(dir.path(), Uuid::new_v4()).unwrap();
        mem.add_turn("q1".into(), "a1".into(), 0.95, "documents".into(), unit_vec(0.0), unit_vec(0.0), None).unwrap();
        // 60 degrees apart: cosine(60) = 0.5, well under 0.85.
        assert!(mem.search_similar(&unit_vec(60.0)).is_none());
    }

    #[test]
    fn match_above_threshold_on_query_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let mut mem = SessionMemory::load_or_new(dir.path(), Uuid::new_v4()).unwrap();
        mem.add_turn("q1".into(), "a1".into(), 0.95, "documents".into(), unit_vec(0.0), unit_vec(90.0), None).unwrap();
        let found = mem.search_similar(&unit_vec(2.0)).unwrap();
        assert_eq!(found.turn.turn_id, 0);
    }

    #[test]
    fn unvalidated_turns_are_never_matched() {
        let dir = tempfile::tempdir().unwrap();
        let mut mem = SessionMemory::load_or_new(dir.path(), Uuid::new_v4()).unwrap();
        let id = mem.add_turn("q1".into(), "a1".into(), 0.95, "documents".into(), unit_vec(0.0), unit_vec(0.0), None).unwrap();
        mem.turns[id].turn.validated = false;
        assert!(mem.search_similar(&unit_vec(0.0)).is_none());
    }

    #[test]
    fn low_confidence_turns_are_never_matched() {
        let dir = tempfile::tempdir().unwrap();
        let mut mem = SessionMemory::load_or_new(dir.path(), Uuid::new_v4()).unwrap();
        mem.add_turn("q1".into(), "a1".into(), 0.5, "documents".into(), unit_vec(0.0), unit_vec(0.0), None).unwrap();
        assert!(mem.search_similar(&unit_vec(0.0)).is_none());
    }

    #[test]
    fn persisted_session_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let session_id = Uuid::new_v4();
        {
            let mut mem = SessionMemory::load_or_new(dir.path(), session_id).unwrap();
            mem.add_turn("q1".into(), "a1".into(), 0.95, "documents".into(), unit_vec(0.0), unit_vec(0.0), None).unwrap();
        }
        let reloaded = SessionMemory::load_or_new(dir.path(), session_id).unwrap();
        assert_eq!(reloaded.len(), 1);
    }
}

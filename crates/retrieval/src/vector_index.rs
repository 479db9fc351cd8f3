//! Persisted approximate-NN index with sidecar metadata (C2).
//!
//! Real nearest-neighbour libraries don't round-trip well through a plain
//! file pair, so this is a brute-force cosine index: fine for the corpus
//! sizes a single-process orchestrator deals with, and it keeps the on-disk
//! contract (`index.bin` + `metadata.json`) simple enough to inspect by hand.

use std::path::{Path, PathBuf};

use qa_domain::error::{Error, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// One vector plus its row id, stored in `index.bin`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRow {
    id: usize,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    dimension: usize,
    rows: Vec<IndexRow>,
}

/// A persisted vector index paired with a metadata array, one entry per row.
///
/// `M` is the metadata record type (e.g. a `MemoryEntry` or `DocumentChunk`);
/// it is serialised to `metadata.json` in the same row order as `index.bin`.
pub struct VectorIndex<M> {
    dir: PathBuf,
    dimension: usize,
    rows: Vec<Vec<f32>>,
    metadata: Vec<M>,
}

impl<M> VectorIndex<M>
where
    M: Serialize + DeserializeOwned + Clone,
{
    /// Load the index at `dir` (`dir/index.bin`, `dir/metadata.json`), creating
    /// an empty one at `dimension` if neither file exists yet.
    pub fn open_or_create(dir: &Path, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(Error::Io)?;
        let index_path = dir.join("index.bin");
        let metadata_path = dir.join("metadata.json");

        if !index_path.exists() || !metadata_path.exists() {
            tracing::info!(path = %dir.display(), dimension, "initializing empty vector index");
            let empty = Self { dir: dir.to_path_buf(), dimension, rows: Vec::new(), metadata: Vec::new() };
            empty.save()?;
            return Ok(empty);
        }

        let index_raw = std::fs::read(&index_path).map_err(Error::Io)?;
        let index_file: IndexFile = serde_json::from_slice(&index_raw)?;
        if index_file.dimension != dimension {
            return Err(Error::EmbeddingError(format!(
                "index at {} has dimension {}, but the active embedding provider commits to {}",
                dir.display(),
                index_file.dimension,
                dimension
            )));
        }

        let metadata_raw = std::fs::read_to_string(&metadata_path).map_err(Error::Io)?;
        let metadata: Vec<M> = serde_json::from_str(&metadata_raw)?;
        if metadata.len() != index_file.rows.len() {
            return Err(Error::BlackboardInvariant(format!(
                "index/metadata row count mismatch at {}: {} vectors vs {} metadata records",
                dir.display(),
                index_file.rows.len(),
                metadata.len()
            )));
        }

        let rows = index_file.rows.into_iter().map(|r| r.vector).collect();
        tracing::info!(path = %dir.display(), rows = metadata.len(), "loaded vector index");
        Ok(Self { dir: dir.to_path_buf(), dimension, rows, metadata })
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Append one vector + metadata record and persist immediately.
    ///
    /// Writes are expected to be serialised by the caller (C4's indexing
    /// path owns the only writer per tier).
    pub fn push(&mut self, vector: Vec<f32>, metadata: M) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::EmbeddingError(format!(
                "vector has dimension {}, index expects {}",
                vector.len(),
                self.dimension
            )));
        }
        self.rows.push(vector);
        self.metadata.push(metadata);
        self.save()
    }

    /// Return the `top_k` nearest rows to `query` by cosine similarity,
    /// highest similarity first.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<(f32, &M)> {
        let mut scored: Vec<(f32, &M)> =
            self.rows.iter().zip(self.metadata.iter()).map(|(v, m)| (cosine_similarity(query, v), m)).collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    fn save(&self) -> Result<()> {
        let index_file = IndexFile {
            dimension: self.dimension,
            rows: self.rows.iter().enumerate().map(|(id, vector)| IndexRow { id, vector: vector.clone() }).collect(),
        };
        std::fs::write(self.dir.join("index.bin"), serde_json::to_vec(&index_file)?).map_err(Error::Io)?;
        std::fs::write(self.dir.join("metadata.json"), serde_json::to_vec_pretty(&self.metadata)?).map_err(Error::Io)?;
        Ok(())
    }
}

/// Cosine similarity. Returns 0.0 if either vector is all-zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qa_domain::memory::MemoryEntry;

    fn entry(answer: &str) -> MemoryEntry {
        MemoryEntry {
            query: "q".into(),
            answer: answer.into(),
            confidence: 0.95,
            source: "documents".into(),
            timestamp: chrono::Utc::now(),
            ttl_hours: 168.0,
            session_id: "s1".into(),
        }
    }

    #[test]
    fn empty_index_is_created_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let index: VectorIndex<MemoryEntry> = VectorIndex::open_or_create(dir.path(), 4).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn dimension_mismatch_on_reload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut index: VectorIndex<MemoryEntry> = VectorIndex::open_or_create(dir.path(), 4).unwrap();
            index.push(vec![1.0, 0.0, 0.0, 0.0], entry("a")).unwrap();
        }
        let reopened = VectorIndex::<MemoryEntry>::open_or_create(dir.path(), 8);
        assert!(reopened.is_err());
    }

    #[test]
    fn search_ranks_by_cosine_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let mut index: VectorIndex<MemoryEntry> = VectorIndex::open_or_create(dir.path(), 2).unwrap();
        index.push(vec![1.0, 0.0], entry("aligned")).unwrap();
        index.push(vec![0.0, 1.0], entry("orthogonal")).unwrap();
        let results = index.search(&[1.0, 0.0], 2);
        assert_eq!(results[0].1.answer, "aligned");
        assert!(results[0].0 > results[1].0);
    }

    #[test]
    fn persisted_index_reloads_with_same_rows() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut index: VectorIndex<MemoryEntry> = VectorIndex::open_or_create(dir.path(), 2).unwrap();
            index.push(vec![1.0, 0.0], entry("a")).unwrap();
        }
        let reloaded: VectorIndex<MemoryEntry> = VectorIndex::open_or_create(dir.path(), 2).unwrap();
        assert_eq!(reloaded.len(), 1);
    }
}

//! # Vector Index
//!
//! An immutable, self-contained vector index over catalogue records, persisted
//! as a single JSON file inside its directory so it can be reopened by path
//! alone. Search uses cosine similarity with maximal-marginal-relevance (MMR)
//! selection to balance relevance against result diversity.
//!
//! The index is never mutated in place: updates build a whole new index in a
//! scratch directory and the installer swaps it in (see [`crate::install`]).

use crate::{errors::KbError, gateway::ModelGateway};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
    sync::Arc,
};
use tracing::info;

/// File name of the persisted index inside its directory.
pub const INDEX_FILE_NAME: &str = "index.json";

/// Result count for catalogue retrieval.
pub const DEFAULT_TOP_K: usize = 10;

/// MMR relevance/diversity trade-off used for catalogue retrieval.
pub const DEFAULT_MMR_LAMBDA: f32 = 0.25;

/// One embedded catalogue record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub text: String,
    pub embedding: Vec<f32>,
}

/// An immutable collection of `(embedding, source text)` pairs.
#[derive(Debug, Serialize, Deserialize)]
pub struct VectorIndex {
    dimension: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Builds an index from embedded entries, validating dimensional
    /// consistency. Rejects an empty entry list.
    pub fn from_entries(entries: Vec<IndexEntry>) -> Result<Self, KbError> {
        let dimension = entries
            .first()
            .map(|e| e.embedding.len())
            .ok_or_else(|| KbError::Validation("no data to index".to_string()))?;
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dimension) {
            return Err(KbError::Validation(format!(
                "inconsistent embedding dimensions: expected {dimension}, got {} for record {:?}",
                bad.embedding.len(),
                bad.text
            )));
        }
        Ok(Self { dimension, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Persists the index into `dir` as [`INDEX_FILE_NAME`], creating the
    /// directory if needed. The directory is self-contained afterwards.
    pub fn save(&self, dir: &Path) -> Result<(), KbError> {
        std::fs::create_dir_all(dir)?;
        let file = File::create(dir.join(INDEX_FILE_NAME))?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Reopens a previously saved index from its directory.
    pub fn load(dir: &Path) -> Result<Self, KbError> {
        let file = File::open(dir.join(INDEX_FILE_NAME))?;
        let index: VectorIndex = serde_json::from_reader(BufReader::new(file))?;
        if index.entries.is_empty() {
            return Err(KbError::Validation(
                "persisted index contains no entries".to_string(),
            ));
        }
        Ok(index)
    }

    /// Diversity-aware top-k search.
    ///
    /// Selects up to `k` entries greedily by the MMR criterion: each step
    /// picks the candidate maximizing
    /// `lambda * sim(query, candidate) - (1 - lambda) * max sim(candidate, selected)`.
    /// Results are returned in selection order, most relevant first.
    pub fn mmr_search(&self, query: &[f32], k: usize, lambda: f32) -> Vec<&str> {
        let relevance: Vec<f32> = self
            .entries
            .iter()
            .map(|e| cosine_similarity(query, &e.embedding))
            .collect();

        let mut selected: Vec<usize> = Vec::with_capacity(k.min(self.entries.len()));
        let mut candidates: Vec<usize> = (0..self.entries.len()).collect();

        while selected.len() < k && !candidates.is_empty() {
            let mut best_pos = 0;
            let mut best_score = f32::NEG_INFINITY;
            for (pos, &idx) in candidates.iter().enumerate() {
                let redundancy = selected
                    .iter()
                    .map(|&s| {
                        cosine_similarity(&self.entries[idx].embedding, &self.entries[s].embedding)
                    })
                    .fold(0.0_f32, f32::max);
                let score = lambda * relevance[idx] - (1.0 - lambda) * redundancy;
                if score > best_score {
                    best_score = score;
                    best_pos = pos;
                }
            }
            selected.push(candidates.swap_remove(best_pos));
        }

        selected
            .into_iter()
            .map(|idx| self.entries[idx].text.as_str())
            .collect()
    }
}

/// Embeds `records` through the rate-limited gateway and persists the
/// resulting index under `dir`.
///
/// Rejects an empty record list with a validation error before any backend
/// call. A backend failure mid-build propagates and leaves nothing behind at
/// the final index location; the caller owns discarding the scratch directory.
pub async fn build_index(
    records: &[String],
    gateway: &ModelGateway,
    dir: &Path,
) -> Result<VectorIndex, KbError> {
    if records.is_empty() {
        return Err(KbError::Validation("no data to index".to_string()));
    }

    let mut entries = Vec::with_capacity(records.len());
    for record in records {
        let embedding = gateway.embed(record).await?;
        entries.push(IndexEntry {
            text: record.clone(),
            embedding,
        });
    }

    let index = VectorIndex::from_entries(entries)?;
    index.save(dir)?;
    info!(rows = index.len(), dir = %dir.display(), "vector index built");
    Ok(index)
}

/// A query handle over an opened index, preconfigured for MMR search.
#[derive(Debug, Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    k: usize,
    lambda: f32,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, k: usize, lambda: f32) -> Self {
        Self { index, k, lambda }
    }

    /// Returns the texts of the top-k diverse matches for a query embedding.
    pub fn retrieve(&self, query_embedding: &[f32]) -> Vec<String> {
        self.index
            .mmr_search(query_embedding, self.k, self.lambda)
            .into_iter()
            .map(String::from)
            .collect()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
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

    fn entry(text: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            text: text.to_string(),
            embedding,
        }
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_entries_are_rejected() {
        let err = VectorIndex::from_entries(Vec::new()).unwrap_err();
        assert!(matches!(err, KbError::Validation(_)));
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let err = VectorIndex::from_entries(vec![
            entry("a", vec![1.0, 0.0]),
            entry("b", vec![1.0, 0.0, 0.0]),
        ])
        .unwrap_err();
        assert!(matches!(err, KbError::Validation(_)));
    }

    #[test]
    fn mmr_picks_the_most_relevant_entry_first() {
        let index = VectorIndex::from_entries(vec![
            entry("x", vec![1.0, 0.0, 0.0]),
            entry("y", vec![0.0, 1.0, 0.0]),
            entry("z", vec![0.0, 0.0, 1.0]),
        ])
        .unwrap();
        let results = index.mmr_search(&[0.0, 1.0, 0.0], 2, 0.25);
        assert_eq!(results[0], "y");
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn mmr_prefers_diverse_results_over_duplicates() {
        // Two near-duplicates of the query direction plus one orthogonal
        // entry. With a diversity-heavy lambda the orthogonal entry should be
        // chosen second.
        let index = VectorIndex::from_entries(vec![
            entry("dup1", vec![1.0, 0.0]),
            entry("dup2", vec![0.999, 0.001]),
            entry("other", vec![0.0, 1.0]),
        ])
        .unwrap();
        let results = index.mmr_search(&[1.0, 0.0], 2, 0.25);
        assert_eq!(results[0], "dup1");
        assert_eq!(results[1], "other");
    }

    #[test]
    fn mmr_result_count_is_bounded_by_index_size() {
        let index = VectorIndex::from_entries(vec![entry("only", vec![1.0])]).unwrap();
        assert_eq!(index.mmr_search(&[1.0], 10, 0.25).len(), 1);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::from_entries(vec![entry("a | 1", vec![0.1, 0.2])]).unwrap();
        index.save(dir.path()).unwrap();
        let reopened = VectorIndex::load(dir.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.dimension(), 2);
    }
}

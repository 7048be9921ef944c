// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ranks indexed files against a natural-language query.

use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::embedding::provider::EmbeddingProvider;
use crate::embedding::storage::{ChunkRecord, IndexStore};
use crate::errors::QueryError;

/// Default number of files returned.
pub const DEFAULT_LIMIT: usize = 5;

/// How chunk scores combine into one file score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreAggregation {
    /// Best chunk wins
    #[default]
    Max,
    Mean,
    /// Mean of the k best chunks
    TopKMean(usize),
}

impl ScoreAggregation {
    /// Combines chunk scores. `scores` must be non-empty.
    pub fn aggregate(&self, scores: &[f32]) -> f32 {
        if scores.is_empty() {
            return 0.0;
        }
        match *self {
            ScoreAggregation::Max => scores.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            ScoreAggregation::Mean => scores.iter().sum::<f32>() / scores.len() as f32,
            ScoreAggregation::TopKMean(k) => {
                let mut sorted = scores.to_vec();
                sorted.sort_by(|a, b| b.total_cmp(a));
                let k = k.clamp(1, sorted.len());
                sorted[..k].iter().sum::<f32>() / k as f32
            }
        }
    }
}

/// One ranked file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub score: f32,
    /// Text of the best-matching chunk
    pub excerpt: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// Answers queries from the store's current snapshot.
pub struct QueryEngine {
    store: Arc<IndexStore>,
    provider: Arc<dyn EmbeddingProvider>,
    aggregation: ScoreAggregation,
}

impl QueryEngine {
    pub fn new(store: Arc<IndexStore>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            provider,
            aggregation: ScoreAggregation::default(),
        }
    }

    pub fn with_aggregation(mut self, aggregation: ScoreAggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn aggregation(&self) -> ScoreAggregation {
        self.aggregation
    }

    /// Returns up to `limit` files, best first; equal scores order by path.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        if limit == 0 {
            return Err(QueryError::InvalidLimit);
        }

        let snapshot = self.store.snapshot();
        if snapshot.chunks.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.provider.embed_one(query)?;
        if query_vector.len() != snapshot.dimension {
            return Err(QueryError::DimensionMismatch {
                query: query_vector.len(),
                index: snapshot.dimension,
            });
        }
        if self.provider.model_id() != snapshot.model_id {
            return Err(QueryError::ModelMismatch {
                query: self.provider.model_id().to_string(),
                index: snapshot.model_id.clone(),
            });
        }

        let scored: Vec<(f32, &ChunkRecord)> = snapshot
            .chunks
            .par_iter()
            .filter_map(|chunk| {
                let entry = snapshot.lookup(&chunk.content_hash)?;
                Some((cosine_similarity(&query_vector, &entry.vector), chunk))
            })
            .collect();

        let mut by_file: BTreeMap<&str, Vec<(f32, &ChunkRecord)>> = BTreeMap::new();
        for (score, chunk) in scored {
            by_file.entry(chunk.path.as_str()).or_default().push((score, chunk));
        }

        let mut results: Vec<SearchResult> = by_file
            .into_iter()
            .filter_map(|(path, chunks)| {
                let scores: Vec<f32> = chunks.iter().map(|(s, _)| *s).collect();
                // First maximum, so ties keep the earliest chunk.
                let (_, best) = chunks
                    .iter()
                    .fold(None::<(f32, &ChunkRecord)>, |acc, &(score, chunk)| match acc {
                        Some((top, _)) if top >= score => acc,
                        _ => Some((score, chunk)),
                    })?;
                let excerpt = snapshot
                    .lookup(&best.content_hash)
                    .map(|entry| entry.text.trim_end().to_string())
                    .unwrap_or_default();
                Some(SearchResult {
                    path: path.to_string(),
                    score: self.aggregation.aggregate(&scores),
                    excerpt,
                    start_line: best.start_line,
                    end_line: best.end_line,
                })
            })
            .collect();

        results.sort_by(|a, b| match b.score.total_cmp(&a.score) {
            Ordering::Equal => a.path.cmp(&b.path),
            other => other,
        });
        results.truncate(limit);

        tracing::debug!(
            query,
            generation = snapshot.generation,
            chunks = snapshot.chunks.len(),
            results = results.len(),
            "query ranked"
        );
        Ok(results)
    }
}

/// Cosine similarity; zero when either vector has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

//! Similarity ranking over cached fingerprints.
//!
//! Scores every cached issue against a query fingerprint with cosine
//! similarity and keeps the ones at or above the threshold, highest
//! first. Read-only with respect to the cache: records that fail to
//! decode are skipped with a warning, never fatal to the batch.

use std::sync::Arc;

use crate::fingerprint;
use crate::issues::{CachedIssue, RankedIssue};
use crate::semantic::embeddings::{Embedder, EmbeddingError};
use crate::semantic::preprocess::embedding_input;

pub struct IssueRanker {
    embedder: Arc<dyn Embedder>,
}

impl IssueRanker {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Rank cached issues against a query built from title + description.
    ///
    /// The query goes through the same normalization and embedder the
    /// cache records did, so the fingerprints are comparable. Results
    /// hold every issue with `score >= threshold`, sorted descending;
    /// equal scores keep their input order.
    pub async fn rank(
        &self,
        issues: &[CachedIssue],
        title: &str,
        description: &str,
        threshold: f32,
    ) -> Result<Vec<RankedIssue>, EmbeddingError> {
        let query_text = embedding_input(title, &[description.to_string()]);
        let query = self.embedder.embed(&query_text).await?;
        let query_norm = l2_norm(&query);

        let mut ranked: Vec<RankedIssue> = Vec::new();
        for issue in issues {
            let vector = match fingerprint::decode(&issue.fingerprint, &issue.shape) {
                Ok(vector) => vector,
                Err(err) => {
                    log::warn!(
                        "skipping issue {}#{}: undecodable fingerprint: {}",
                        issue.repository,
                        issue.number,
                        err
                    );
                    continue;
                }
            };

            if vector.len() != query.len() {
                log::warn!(
                    "skipping issue {}#{}: fingerprint has {} dimensions, query has {}",
                    issue.repository,
                    issue.number,
                    vector.len(),
                    query.len()
                );
                continue;
            }

            let score = cosine_with_norm(&query, &vector, query_norm);
            if score >= threshold {
                ranked.push(RankedIssue::from_cached(issue, score));
            }
        }

        // Stable sort keeps input order for equal scores
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        Ok(ranked)
    }
}

/// Cosine similarity between two vectors.
/// Returns 0.0 for degenerate input (zero norm or length mismatch).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    cosine_with_norm(a, b, l2_norm(a))
}

fn cosine_with_norm(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    if query_norm < f32::EPSILON || target_norm < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    dot_product / (query_norm * target_norm)
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

//! Vector similarity and relevance ranking.
//!
//! Search ranks candidates by a composite score:
//! `0.7 × cosine + 0.15 × importance + 0.15 × recency`, after dropping
//! candidates whose cosine similarity is below the threshold.

use cadence_core::memory::Memory;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

pub const SIMILARITY_WEIGHT: f64 = 0.7;
pub const IMPORTANCE_WEIGHT: f64 = 0.15;
pub const RECENCY_WEIGHT: f64 = 0.15;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Exponential decay with the given half-life: 1.0 when new, 0.5 after one half-life.
///
/// Future timestamps count as age zero.
pub fn recency_decay(created_at: DateTime<Utc>, now: DateTime<Utc>, half_life_hours: f64) -> f64 {
    let age_hours = (now - created_at).num_milliseconds().max(0) as f64 / 3_600_000.0;
    if half_life_hours <= 0.0 {
        return 0.0;
    }
    (-std::f64::consts::LN_2 * age_hours / half_life_hours).exp()
}

pub fn composite_score(similarity: f64, importance: f64, recency: f64) -> f64 {
    SIMILARITY_WEIGHT * similarity + IMPORTANCE_WEIGHT * importance + RECENCY_WEIGHT * recency
}

/// A search hit with its score breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub similarity: f32,
    pub recency: f64,
    pub score: f64,
}

/// Parameters for [`rank`].
#[derive(Debug, Clone, Copy)]
pub struct RankParams {
    pub threshold: f32,
    pub limit: usize,
    pub half_life_hours: f64,
    pub now: DateTime<Utc>,
}

/// Score, filter and order candidates against a query embedding.
///
/// Candidates without an embedding or below `threshold` are dropped.
/// Ordering: composite score desc, then importance desc, then newest first.
pub fn rank(candidates: Vec<Memory>, query: &[f32], params: RankParams) -> Vec<ScoredMemory> {
    let mut scored: Vec<ScoredMemory> = candidates
        .into_iter()
        .filter_map(|memory| {
            let similarity = cosine_similarity(memory.embedding.as_deref()?, query);
            if similarity < params.threshold {
                return None;
            }
            let recency = recency_decay(memory.created_at, params.now, params.half_life_hours);
            let score = composite_score(similarity as f64, memory.importance as f64, recency);
            Some(ScoredMemory {
                memory,
                similarity,
                recency,
                score,
            })
        })
        .collect();

    scored.sort_by(compare_ranked);
    scored.truncate(params.limit);
    scored
}

fn compare_ranked(a: &ScoredMemory, b: &ScoredMemory) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.memory
                .importance
                .partial_cmp(&a.memory.importance)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
}

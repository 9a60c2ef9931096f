//! Brute-force cosine similarity over in-memory vectors.
//!
//! Useful for checking search results offline against the vectors file.
//! Every function is a full scan; there is no index.

use std::cmp::Ordering;

/// Cosine similarity of two vectors.
///
/// Returns 0.0 when lengths differ, either vector is empty, or either has
/// zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// A candidate's position and its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredIndex {
    pub index: usize,
    pub score: f32,
}

/// A pair of vector positions (`first < second`) and their score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredPair {
    pub first: usize,
    pub second: usize,
    pub score: f32,
}

fn descending(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// The `k` candidates most similar to `query`, best first.
///
/// Equal scores keep their original order.
pub fn top_k<V: AsRef<[f32]>>(query: &[f32], candidates: &[V], k: usize) -> Vec<ScoredIndex> {
    let mut scored: Vec<ScoredIndex> = candidates
        .iter()
        .enumerate()
        .map(|(index, v)| ScoredIndex {
            index,
            score: cosine_similarity(query, v.as_ref()),
        })
        .collect();
    // stable sort keeps ties in input order
    scored.sort_by(|a, b| descending(a.score, b.score));
    scored.truncate(k);
    scored
}

/// Every unordered pair, best first, keeping those scoring at least
/// `threshold` when one is given.
pub fn pairwise<V: AsRef<[f32]>>(vectors: &[V], threshold: Option<f32>) -> Vec<ScoredPair> {
    let mut pairs = Vec::new();
    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            let score = cosine_similarity(vectors[i].as_ref(), vectors[j].as_ref());
            if threshold.map_or(true, |t| score >= t) {
                pairs.push(ScoredPair {
                    first: i,
                    second: j,
                    score,
                });
            }
        }
    }
    pairs.sort_by(|a, b| descending(a.score, b.score));
    pairs
}

/// The `n` most similar pairs.
pub fn most_similar_pairs<V: AsRef<[f32]>>(vectors: &[V], n: usize) -> Vec<ScoredPair> {
    let mut pairs = pairwise(vectors, None);
    pairs.truncate(n);
    pairs
}

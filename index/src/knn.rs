use crate::embedding::cosine_similarity;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredIdx {
    pub idx: usize,
    pub score: f32,
}

/// Score every vector in `haystack` against `query` and return all of them in
/// descending score order.
///
/// The sort is stable, so equal scores keep their insertion order. Any vector
/// that cannot be scored (zero norm, wrong length) fails the whole ranking.
pub fn rank_cosine(haystack: &[Vec<f32>], query: &[f32]) -> Result<Vec<ScoredIdx>> {
    let mut scored = Vec::with_capacity(haystack.len());
    for (i, v) in haystack.iter().enumerate() {
        scored.push(ScoredIdx { idx: i, score: cosine_similarity(query, v)? });
    }
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(scored)
}

/// Return indices of the top_k most similar vectors (cosine similarity),
/// in descending score order.
pub fn top_k_cosine(haystack: &[Vec<f32>], query: &[f32], top_k: usize) -> Result<Vec<ScoredIdx>> {
    if top_k == 0 || haystack.is_empty() {
        return Ok(Vec::new());
    }
    let mut scored = rank_cosine(haystack, query)?;
    scored.truncate(top_k);
    Ok(scored)
}

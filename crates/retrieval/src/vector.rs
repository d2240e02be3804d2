//! Vector similarity utilities.
//!
//! Pure-Rust cosine similarity and nearest-neighbor ranking over
//! [`RetrievedItem`]s that carry embeddings.

use greenlight_core::retrieval::RetrievedItem;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length, empty, or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = f64::from(*x);
        let y = f64::from(*y);
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

/// Highest cosine similarity between `query` and any of `others`, or 0.0 when
/// `others` is empty.
pub fn max_similarity<'a>(query: &[f32], others: impl IntoIterator<Item = &'a [f32]>) -> f32 {
    others
        .into_iter()
        .map(|other| cosine_similarity(query, other))
        .fold(0.0f32, f32::max)
}

/// Rank items by cosine similarity to a query embedding.
///
/// Returns up to `limit` items sorted by descending similarity, with `score`
/// set to the similarity clamped to [0, 1]. Items without embeddings are skipped.
pub fn rank_by_similarity(
    items: &[RetrievedItem],
    query_embedding: &[f32],
    limit: usize,
) -> Vec<RetrievedItem> {
    let mut scored: Vec<(f32, RetrievedItem)> = items
        .iter()
        .filter_map(|item| {
            let emb = item.embedding.as_ref()?;
            let sim = cosine_similarity(emb, query_embedding).clamp(0.0, 1.0);
            let mut ranked = item.clone();
            ranked.score = sim;
            Some((sim, ranked))
        })
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(limit);
    scored.into_iter().map(|(_, item)| item).collect()
}

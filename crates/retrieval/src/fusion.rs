//! Fusion & deduplication — merge both retrievers' results into one ranked context.
//!
//! Two-stage dedup:
//! 1. exact title match (normalized), keeping the stronger candidate;
//! 2. embedding cosine ≥ threshold, keeping the higher-ranked candidate.
//!
//! Ranking score = retriever score, plus a fixed boost for structured matches.
//! When two candidates' ranking scores are within `tie_margin`, the configured
//! tie-break source wins.

use greenlight_config::{FusionConfig, TieBreak};
use greenlight_core::retrieval::{RetrievalSource, RetrievedItem};
use std::collections::HashMap;
use tracing::debug;

use crate::vector::cosine_similarity;

#[derive(Debug, Clone)]
pub struct FusionEngine {
    dedup_threshold: f32,
    structured_boost: f32,
    tie_margin: f32,
    preferred: RetrievalSource,
}

struct Candidate {
    item: RetrievedItem,
    rank_score: f32,
}

impl FusionEngine {
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            dedup_threshold: config.dedup_threshold,
            structured_boost: config.structured_boost,
            tie_margin: config.tie_margin,
            preferred: match config.tie_break {
                TieBreak::Structured => RetrievalSource::Structured,
                TieBreak::Similarity => RetrievalSource::Similarity,
            },
        }
    }

    /// Merge, dedupe, rank and truncate to `budget`.
    ///
    /// Every returned item carries its fused ranking score in
    /// `metadata["fused_score"]`; `score` keeps the retriever's value.
    pub fn fuse(
        &self,
        structured: &[RetrievedItem],
        similarity: &[RetrievedItem],
        budget: usize,
    ) -> Vec<RetrievedItem> {
        let incoming = structured.len() + similarity.len();
        if budget == 0 || incoming == 0 {
            return Vec::new();
        }

        let tagged = structured
            .iter()
            .map(|i| (i, RetrievalSource::Structured))
            .chain(similarity.iter().map(|i| (i, RetrievalSource::Similarity)))
            .map(|(item, source)| self.candidate(item, source));

        let mut survivors = self.dedup_by_title(tagged);
        let after_title = survivors.len();

        // Stable sort: equal scores keep input order, structured first.
        survivors.sort_by(|a, b| {
            b.rank_score
                .total_cmp(&a.rank_score)
                .then_with(|| self.source_rank(a.item.source).cmp(&self.source_rank(b.item.source)))
        });

        let mut kept = self.dedup_by_embedding(survivors);
        kept.truncate(budget);

        debug!(
            incoming,
            after_title,
            returned = kept.len(),
            budget,
            "Fusion complete"
        );

        kept.into_iter()
            .map(|c| {
                let mut item = c.item;
                item.metadata
                    .insert("fused_score".into(), f64::from(c.rank_score).into());
                item
            })
            .collect()
    }

    fn candidate(&self, item: &RetrievedItem, source: RetrievalSource) -> Candidate {
        let mut item = item.clone();
        item.source = source;
        let boost = match source {
            RetrievalSource::Structured => self.structured_boost,
            RetrievalSource::Similarity => 0.0,
        };
        Candidate {
            rank_score: item.score + boost,
            item,
        }
    }

    fn dedup_by_title(&self, candidates: impl Iterator<Item = Candidate>) -> Vec<Candidate> {
        let mut kept: Vec<Candidate> = Vec::new();
        let mut by_title: HashMap<String, usize> = HashMap::new();

        for candidate in candidates {
            let key = title_key(&candidate.item);
            match by_title.get(&key) {
                Some(&slot) => {
                    if self.beats(&candidate, &kept[slot]) {
                        kept[slot] = candidate;
                    }
                }
                None => {
                    by_title.insert(key, kept.len());
                    kept.push(candidate);
                }
            }
        }
        kept
    }

    /// Greedy pass over candidates sorted best-first. A near-duplicate of a
    /// kept item is dropped, or replaces it when it is the preferred source
    /// and the scores are within the tie margin.
    fn dedup_by_embedding(&self, sorted: Vec<Candidate>) -> Vec<Candidate> {
        let mut kept: Vec<Candidate> = Vec::with_capacity(sorted.len());

        for candidate in sorted {
            let duplicate_of = candidate.item.embedding.as_ref().and_then(|emb| {
                kept.iter().position(|k| {
                    k.item
                        .embedding
                        .as_ref()
                        .is_some_and(|other| cosine_similarity(emb, other) >= self.dedup_threshold)
                })
            });

            match duplicate_of {
                None => kept.push(candidate),
                Some(slot) => {
                    if self.beats(&candidate, &kept[slot]) {
                        kept[slot] = candidate;
                    }
                }
            }
        }
        kept
    }

    /// Whether `challenger` should displace `incumbent`.
    fn beats(&self, challenger: &Candidate, incumbent: &Candidate) -> bool {
        let close = (challenger.rank_score - incumbent.rank_score).abs() <= self.tie_margin;
        if close && challenger.item.source != incumbent.item.source {
            return challenger.item.source == self.preferred;
        }
        challenger.rank_score > incumbent.rank_score
    }

    fn source_rank(&self, source: RetrievalSource) -> u8 {
        u8::from(source != self.preferred)
    }
}

/// Normalized title; falls back to the item id for untitled items.
fn title_key(item: &RetrievedItem) -> String {
    let normalized = item
        .title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if normalized.is_empty() {
        format!("id:{}", item.id)
    } else {
        normalized
    }
}

//! Structured retriever — attribute-filtered queries against the relationship store.
//!
//! Ranking tiers: every constraint matched > some constraints matched >
//! organization-default fallback. Within a tier, more matched constraints
//! rank first, then seniority, then most recently updated.

use greenlight_core::entity::{AttributeFilter, Entity, EntityId, EntityStore};
use greenlight_core::error::RetrievalError;
use greenlight_core::provider::Embedder;
use greenlight_core::retrieval::{RetrievalSource, RetrievedItem};
use std::cmp::{Ordering, Reverse};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// How well an entity matched the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchTier {
    Exact,
    Partial,
    Fallback,
}

impl MatchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::Exact => "exact",
            MatchTier::Partial => "partial",
            MatchTier::Fallback => "fallback",
        }
    }
}

pub struct StructuredRetriever {
    store: Arc<dyn EntityStore>,
    embedder: Option<Arc<dyn Embedder>>,
    limit: usize,
}

impl StructuredRetriever {
    pub fn new(store: Arc<dyn EntityStore>, limit: usize) -> Self {
        Self {
            store,
            embedder: None,
            limit,
        }
    }

    /// Embedder used by [`attach_embeddings`](Self::attach_embeddings).
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Query the store.
    ///
    /// Entities in `include` are always queried for and ranked first. An
    /// entity in `exclude` is omitted unless it is also in `include`.
    pub async fn query(
        &self,
        filter: &AttributeFilter,
        include: &BTreeSet<EntityId>,
        exclude: &BTreeSet<EntityId>,
    ) -> Result<Vec<RetrievedItem>, RetrievalError> {
        let mut effective = filter.clone();
        effective.entities.extend(include.iter().cloned());
        let constraints = effective.constraint_count();

        let candidates = self.store.query(&effective).await.inspect_err(|e| {
            warn!(store = %self.store.name(), error = %e, "Structured store query failed");
        })?;

        let mut ranked: Vec<(MatchTier, usize, Entity)> = candidates
            .into_iter()
            .filter(|e| include.contains(&e.id) || !exclude.contains(&e.id))
            .map(|e| {
                let matched = e.matched_constraints(&effective);
                (tier_for(matched, constraints), matched, e)
            })
            .collect();

        ranked.sort_by(|a, b| {
            let a_included = include.contains(&a.2.id);
            let b_included = include.contains(&b.2.id);
            b_included
                .cmp(&a_included)
                .then(a.0.cmp(&b.0))
                .then(b.1.cmp(&a.1))
                .then_with(|| compare_seniority(&a.2, &b.2))
                .then_with(|| a.2.name.cmp(&b.2.name))
        });
        ranked.truncate(self.limit);

        let mut items = Vec::with_capacity(ranked.len());
        for (tier, matched, entity) in ranked {
            let text = self.describe(&entity).await;
            items.push(to_item(entity, tier, matched, constraints, text));
        }

        debug!(
            store = %self.store.name(),
            constraints,
            results = items.len(),
            excluded = exclude.len(),
            "Structured retrieval complete"
        );
        Ok(items)
    }

    /// Render an entity with its relationship context.
    async fn describe(&self, entity: &Entity) -> String {
        let mut parts = vec![entity.name.clone()];
        let attrs = &entity.attributes;
        if let Some(title) = &attrs.title {
            parts.push(title.clone());
        }
        if let Some(region) = &attrs.region {
            parts.push(format!("covers {region}"));
        }
        if !attrs.formats.is_empty() {
            parts.push(format!("formats: {}", attrs.formats.join(", ")));
        }
        if !attrs.genres.is_empty() {
            parts.push(format!("genres: {}", attrs.genres.join(", ")));
        }

        for rel in &entity.relationships {
            let target = match self.store.get(&rel.target).await {
                Ok(Some(target)) => target.name,
                Ok(None) => rel.target.to_string(),
                Err(e) => {
                    debug!(target = %rel.target, error = %e, "Relationship target lookup failed");
                    rel.target.to_string()
                }
            };
            parts.push(format!("{} {}", rel.relation, target));
        }

        parts.join("; ")
    }

    /// Embed item texts concurrently so fusion can detect paraphrases
    /// across sources.
    ///
    /// Runs after the store query and never fails: an item whose embedding
    /// call fails keeps `embedding: None`. Items are filled in as their calls
    /// complete, so a caller that stops waiting keeps the finished ones.
    pub async fn attach_embeddings(&self, items: &mut [RetrievedItem]) {
        let Some(embedder) = &self.embedder else {
            return;
        };

        let mut pending = JoinSet::new();
        for (index, item) in items.iter().enumerate() {
            let embedder = Arc::clone(embedder);
            let text = item.text.clone();
            pending.spawn(async move { (index, embedder.embed(&text).await) });
        }

        let mut failed = 0usize;
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((index, Ok(embedding))) => {
                    if let Some(item) = items.get_mut(index) {
                        item.embedding = Some(embedding);
                    }
                }
                Ok((_, Err(e))) => {
                    failed += 1;
                    debug!(error = %e, "Structured item left without embedding");
                }
                Err(e) => {
                    failed += 1;
                    debug!(error = %e, "Structured embedding task failed");
                }
            }
        }
        if failed > 0 {
            warn!(
                embedder = %embedder.name(),
                failed,
                total = items.len(),
                "Structured items kept without embeddings"
            );
        }
    }
}

fn tier_for(matched: usize, constraints: usize) -> MatchTier {
    if constraints > 0 && matched == constraints {
        MatchTier::Exact
    } else if matched > 0 {
        MatchTier::Partial
    } else {
        MatchTier::Fallback
    }
}

/// Higher seniority first, then most recently updated (unknown last).
fn compare_seniority(a: &Entity, b: &Entity) -> Ordering {
    b.attributes
        .seniority
        .cmp(&a.attributes.seniority)
        .then_with(|| Reverse(a.attributes.updated_at).cmp(&Reverse(b.attributes.updated_at)))
}

fn tier_score(tier: MatchTier, matched: usize, constraints: usize) -> f32 {
    match tier {
        MatchTier::Exact => 0.9,
        MatchTier::Partial => 0.5 + 0.3 * (matched as f32 / constraints.max(1) as f32),
        MatchTier::Fallback => 0.3,
    }
}

fn to_item(
    entity: Entity,
    tier: MatchTier,
    matched: usize,
    constraints: usize,
    text: String,
) -> RetrievedItem {
    let mut metadata = serde_json::Map::new();
    metadata.insert("tier".into(), tier.as_str().into());
    metadata.insert("matched_constraints".into(), matched.into());
    if let Ok(kind) = serde_json::to_value(entity.kind) {
        metadata.insert("kind".into(), kind);
    }

    RetrievedItem {
        id: entity.id.to_string(),
        source: RetrievalSource::Structured,
        title: entity.name,
        text,
        score: tier_score(tier, matched, constraints),
        entity_refs: vec![entity.id],
        embedding: None,
        metadata,
    }
}

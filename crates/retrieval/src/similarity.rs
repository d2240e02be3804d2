//! Similarity retriever — embed the query, search the vector index, filter exclusions.
//!
//! Requests `2 × top_k` neighbors so that post-filter loss rarely leaves
//! fewer than `top_k` results.

use greenlight_core::entity::EntityId;
use greenlight_core::error::RetrievalError;
use greenlight_core::provider::Embedder;
use greenlight_core::retrieval::{RetrievalSource, RetrievedItem, VectorIndex};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SimilarityRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl SimilarityRetriever {
    /// `embedder` is normally the process-wide [`crate::EmbeddingCache`].
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        include: &BTreeSet<EntityId>,
        exclude: &BTreeSet<EntityId>,
    ) -> Result<Vec<RetrievedItem>, RetrievalError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(text).await.map_err(|e| {
            warn!(embedder = %self.embedder.name(), error = %e, "Query embedding failed");
            RetrievalError::SourceUnavailable {
                retriever: RetrievalSource::Similarity,
                reason: e.to_string(),
            }
        })?;

        let candidates = self
            .index
            .search(&query_embedding, top_k.saturating_mul(2))
            .await
            .inspect_err(|e| {
                warn!(index = %self.index.name(), error = %e, "Vector index search failed");
            })?;
        let fetched = candidates.len();

        let mut items: Vec<RetrievedItem> = candidates
            .into_iter()
            .filter(|item| !is_excluded(item, include, exclude))
            .map(|mut item| {
                item.source = RetrievalSource::Similarity;
                item
            })
            .collect();

        items.sort_by(|a, b| b.score.total_cmp(&a.score));
        items.truncate(top_k);

        debug!(
            index = %self.index.name(),
            fetched,
            returned = items.len(),
            "Similarity retrieval complete"
        );
        Ok(items)
    }
}

/// An item is dropped when any entity it references is excluded and not included.
fn is_excluded(item: &RetrievedItem, include: &BTreeSet<EntityId>, exclude: &BTreeSet<EntityId>) -> bool {
    item.entity_refs
        .iter()
        .any(|e| exclude.contains(e) && !include.contains(e))
}

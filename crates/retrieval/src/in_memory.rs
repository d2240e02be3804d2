//! In-memory stores for tests and small deployments.
//!
//! Both stores can be switched offline to exercise degraded-mode handling.

use async_trait::async_trait;
use greenlight_core::entity::{AttributeFilter, Entity, EntityCatalog, EntityId, EntityName, EntityStore};
use greenlight_core::error::{EmbeddingError, RetrievalError};
use greenlight_core::provider::Embedder;
use greenlight_core::retrieval::{RetrievalSource, RetrievedItem, VectorIndex};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::vector::rank_by_similarity;

/// A read-only entity store backed by a `Vec`.
pub struct InMemoryEntityStore {
    entities: Vec<Entity>,
    available: AtomicBool,
}

impl InMemoryEntityStore {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            entities,
            available: AtomicBool::new(true),
        }
    }

    /// Toggle availability; an offline store fails every call.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn check_available(&self) -> Result<(), RetrievalError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RetrievalError::SourceUnavailable {
                retriever: RetrievalSource::Structured,
                reason: "in-memory entity store is offline".into(),
            })
        }
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn query(&self, filter: &AttributeFilter) -> Result<Vec<Entity>, RetrievalError> {
        self.check_available()?;
        Ok(self
            .entities
            .iter()
            .filter(|e| e.matched_constraints(filter) > 0 || e.attributes.default_contact)
            .cloned()
            .collect())
    }

    async fn get(&self, id: &EntityId) -> Result<Option<Entity>, RetrievalError> {
        self.check_available()?;
        Ok(self.entities.iter().find(|e| &e.id == id).cloned())
    }

    async fn catalog(&self) -> Result<EntityCatalog, RetrievalError> {
        self.check_available()?;
        let mut catalog = EntityCatalog::default();
        for entity in &self.entities {
            catalog.names.push(EntityName {
                id: entity.id.clone(),
                name: entity.name.clone(),
                aliases: entity.aliases.clone(),
            });
            if let Some(region) = &entity.attributes.region {
                catalog.regions.insert(region.clone());
            }
            catalog.formats.extend(entity.attributes.formats.iter().cloned());
            catalog.genres.extend(entity.attributes.genres.iter().cloned());
        }
        Ok(catalog)
    }
}

/// A passage to be indexed.
#[derive(Debug, Clone)]
pub struct Passage {
    pub id: String,
    pub title: String,
    pub text: String,
    pub entity_refs: Vec<EntityId>,
}

/// A brute-force nearest-neighbor index.
pub struct InMemoryVectorIndex {
    items: Vec<RetrievedItem>,
    available: AtomicBool,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Add a passage with a precomputed embedding.
    pub fn add(&mut self, passage: Passage, embedding: Vec<f32>) {
        self.items.push(RetrievedItem {
            id: passage.id,
            source: RetrievalSource::Similarity,
            title: passage.title,
            text: passage.text,
            score: 0.0,
            entity_refs: passage.entity_refs,
            embedding: Some(embedding),
            metadata: serde_json::Map::new(),
        });
    }

    /// Build an index by embedding each passage's text.
    pub async fn from_passages(
        embedder: &dyn Embedder,
        passages: Vec<Passage>,
    ) -> Result<Self, EmbeddingError> {
        let mut index = Self::new();
        for passage in passages {
            let embedding = embedder.embed(&passage.text).await?;
            index.add(passage, embedding);
        }
        Ok(index)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<RetrievedItem>, RetrievalError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(RetrievalError::SourceUnavailable {
                retriever: RetrievalSource::Similarity,
                reason: "in-memory vector index is offline".into(),
            });
        }
        Ok(rank_by_similarity(&self.items, query, limit))
    }
}

//! Retrieved items and the vector index trait.
//!
//! Both retrieval paths produce [`RetrievedItem`]s. Items live for a single
//! query and are never persisted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::error::RetrievalError;

/// Which retrieval path produced an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    /// Attribute-filtered relationship query.
    Structured,
    /// Nearest-neighbor semantic search.
    Similarity,
}

impl std::fmt::Display for RetrievalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrievalSource::Structured => write!(f, "structured"),
            RetrievalSource::Similarity => write!(f, "similarity"),
        }
    }
}

/// A single candidate context item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedItem {
    /// Source-local identifier (entity id or passage id).
    pub id: String,

    pub source: RetrievalSource,

    /// Title or entity name. Used for exact-match deduplication.
    pub title: String,

    pub text: String,

    /// Relevance score in [0, 1] as reported by the producing retriever.
    pub score: f32,

    /// Entities this item is about.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_refs: Vec<EntityId>,

    /// Embedding of `text`, when known. Used for near-duplicate detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RetrievedItem {
    /// Whether this item references the given entity.
    pub fn references(&self, id: &EntityId) -> bool {
        self.entity_refs.iter().any(|e| e == id)
    }
}

/// The read-only nearest-neighbor index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// The index name (e.g., "in_memory", "qdrant").
    fn name(&self) -> &str;

    /// Return up to `limit` passages nearest to `query`, best first,
    /// tagged [`RetrievalSource::Similarity`] with `score` = cosine similarity.
    async fn search(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedItem>, RetrievalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_display_is_lowercase() {
        assert_eq!(RetrievalSource::Structured.to_string(), "structured");
        assert_eq!(RetrievalSource::Similarity.to_string(), "similarity");
    }

    #[test]
    fn references_checks_entity_refs() {
        let item = RetrievedItem {
            id: "doc-1".into(),
            source: RetrievalSource::Similarity,
            title: "Slate notes".into(),
            text: "Notes".into(),
            score: 0.5,
            entity_refs: vec![EntityId::new("a")],
            embedding: None,
            metadata: serde_json::Map::new(),
        };
        assert!(item.references(&EntityId::new("a")));
        assert!(!item.references(&EntityId::new("b")));
    }
}

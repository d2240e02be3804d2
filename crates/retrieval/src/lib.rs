//! Retrieval for Greenlight.
//!
//! - [`StructuredRetriever`]: attribute-filtered relationship queries
//! - [`SimilarityRetriever`]: nearest-neighbor search over an embedded query
//! - [`FusionEngine`]: merge, two-stage dedup, rank, truncate
//! - [`EmbeddingCache`]: bounded LRU in front of the embedding capability
//!
//! In-memory [`EntityStore`](greenlight_core::EntityStore) and
//! [`VectorIndex`](greenlight_core::VectorIndex) implementations live in
//! [`in_memory`].

pub mod cache;
pub mod fusion;
pub mod in_memory;
pub mod similarity;
pub mod structured;
pub mod vector;

pub use cache::{CacheStats, EmbeddingCache};
pub use fusion::FusionEngine;
pub use in_memory::{InMemoryEntityStore, InMemoryVectorIndex, Passage};
pub use similarity::SimilarityRetriever;
pub use structured::{MatchTier, StructuredRetriever};
pub use vector::{cosine_similarity, max_similarity};

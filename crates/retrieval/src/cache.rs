//! Embedding cache — bounded LRU memoization of text → vector lookups.
//!
//! Keys are normalized text (trimmed, lower-cased); the embedding capability
//! always receives the text as given. No TTL: embeddings for identical text
//! never change.
//!
//! Concurrent misses for the same key are coalesced by moka's
//! `try_get_with`: one caller runs the embedding call, the others await its
//! result. Failures are not cached.

use async_trait::async_trait;
use greenlight_core::error::EmbeddingError;
use greenlight_core::provider::Embedder;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Read-through embedding cache in front of an [`Embedder`].
pub struct EmbeddingCache {
    inner: Arc<dyn Embedder>,
    cache: Cache<String, Arc<Vec<f32>>>,
    capacity: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// Create a cache holding at most `capacity` embeddings.
    pub fn new(inner: Arc<dyn Embedder>, capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            inner,
            cache,
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The cache key for a piece of text.
    pub fn normalize(text: &str) -> String {
        text.trim().to_lowercase()
    }

    /// Look up or compute the embedding of `text`.
    pub async fn get_or_embed(&self, text: &str) -> Result<Arc<Vec<f32>>, EmbeddingError> {
        let key = Self::normalize(text);

        if let Some(hit) = self.cache.get(&key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(embedder = %self.inner.name(), chars = text.len(), "Embedding cache miss");

        let inner = Arc::clone(&self.inner);
        let owned = text.to_string();
        self.cache
            .try_get_with(key, async move { inner.embed(&owned).await.map(Arc::new) })
            .await
            .map_err(|e: Arc<EmbeddingError>| (*e).clone())
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Hit/miss counters and the (approximate) entry count.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.entry_count(),
        }
    }

    /// Flush moka's pending maintenance so `stats().entries` is exact.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl Embedder for EmbeddingCache {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        self.get_or_embed(text).await.map(|v| v.as_ref().clone())
    }
}

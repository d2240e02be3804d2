//! Bounded exponential backoff around any [`Embedder`].
//!
//! Only [`EmbeddingError::Transient`] failures are retried. An unavailable
//! capability fails immediately so the similarity retriever can degrade
//! without waiting out the backoff schedule.

use async_trait::async_trait;
use greenlight_core::error::EmbeddingError;
use greenlight_core::provider::Embedder;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// An embedder that retries transient failures of an inner embedder.
pub struct RetryingEmbedder {
    inner: Arc<dyn Embedder>,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl RetryingEmbedder {
    /// Wrap `inner`. `max_attempts` counts the first call; it is clamped to at least 1.
    pub fn new(inner: Arc<dyn Embedder>, max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        // attempt is 1-based; the wait before attempt n+1 is initial * 2^(n-1)
        let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
        self.initial_backoff.saturating_mul(factor)
    }
}

#[async_trait]
impl Embedder for RetryingEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.inner.embed(text).await {
                Ok(vector) => {
                    if attempt > 1 {
                        info!(
                            embedder = %self.inner.name(),
                            attempt,
                            "Embedding succeeded after retry"
                        );
                    }
                    return Ok(vector);
                }
                Err(EmbeddingError::Transient(reason)) => {
                    warn!(
                        embedder = %self.inner.name(),
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %reason,
                        "Transient embedding failure"
                    );
                    last_error = reason;
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.backoff_for(attempt)).await;
                    }
                }
                Err(other) => return Err(other),
            }
        }

        Err(EmbeddingError::Exhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}

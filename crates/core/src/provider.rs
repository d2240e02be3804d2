//! Capability traits — the abstraction over generation and embedding backends.
//!
//! Both capabilities are opaque to the engine: a [`Generator`] turns a prompt
//! into text, an [`Embedder`] turns text into a fixed-length vector.
//!
//! Implementations: OpenAI-compatible HTTP endpoints, scripted mocks in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EmbeddingError, GenerationError};

/// A single prompt sent to the generation capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// System instructions (persona, strategy, constraints)
    pub system: String,

    /// The user-facing prompt with context
    pub prompt: String,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.4
}

/// A completed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The generation capability: `prompt -> text`.
///
/// Generation is the slowest step of a turn. Callers bound it with a timeout
/// and never retry a timed-out call.
#[async_trait]
pub trait Generator: Send + Sync {
    /// A human-readable name for this backend (e.g., "openai", "mock").
    fn name(&self) -> &str;

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationResponse, GenerationError>;
}

/// The embedding capability: `text -> fixed-length vector`.
///
/// Implementations must report failure rather than substitute a zero vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError>;
}

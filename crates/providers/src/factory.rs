//! Capability construction from configuration.

use std::sync::Arc;
use std::time::Duration;

use greenlight_config::EngineConfig;
use greenlight_core::provider::{Embedder, Generator};

use crate::openai_compat::OpenAiCompatProvider;
use crate::retry::RetryingEmbedder;

/// Build the generation capability described by `config.generation`.
pub fn build_generator(config: &EngineConfig) -> Arc<dyn Generator> {
    let generation = &config.generation;
    let api_key = generation.api_key.clone().unwrap_or_default();
    let name = provider_name(&generation.api_url);

    Arc::new(
        OpenAiCompatProvider::new(name, &generation.api_url, api_key)
            .with_timeout(Duration::from_secs(generation.timeout_secs)),
    )
}

/// Build the embedding capability described by `config.embedding`,
/// wrapped in transient-failure retry.
pub fn build_embedder(config: &EngineConfig) -> Arc<dyn Embedder> {
    let embedding = &config.embedding;
    let api_key = embedding.api_key.clone().unwrap_or_default();
    let name = provider_name(&embedding.api_url);

    let inner: Arc<dyn Embedder> = Arc::new(
        OpenAiCompatProvider::new(name, &embedding.api_url, api_key)
            .with_embedding_model(&embedding.model)
            .with_timeout(Duration::from_secs(embedding.timeout_secs)),
    );

    Arc::new(RetryingEmbedder::new(
        inner,
        embedding.max_attempts,
        Duration::from_millis(embedding.initial_backoff_ms),
    ))
}

/// Derive a short backend name from well-known base URLs.
fn provider_name(api_url: &str) -> &'static str {
    if api_url.contains("api.openai.com") {
        "openai"
    } else if api_url.contains("openrouter.ai") {
        "openrouter"
    } else if api_url.contains("localhost:11434") {
        "ollama"
    } else if api_url.contains("api.together.xyz") {
        "together"
    } else if api_url.contains("api.groq.com") {
        "groq"
    } else {
        "custom"
    }
}

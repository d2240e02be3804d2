//! OpenAI-compatible capability adapter.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any endpoint
//! exposing `/v1/chat/completions` and `/v1/embeddings`.
//!
//! One adapter serves both capabilities: [`Generator`] via chat completions
//! and [`Embedder`] via the embeddings endpoint.

use async_trait::async_trait;
use greenlight_core::error::{EmbeddingError, GenerationError};
use greenlight_core::provider::{Embedder, GenerationRequest, GenerationResponse, Generator, Usage};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// An OpenAI-compatible generation and embedding backend.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    embedding_model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            embedding_model: "text-embedding-3-small".into(),
            timeout: Duration::from_secs(60),
            client: reqwest::Client::new(),
        }
    }

    /// Model used by [`Embedder::embed`].
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    /// Per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/{}", self.base_url, path))
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }
}

#[async_trait]
impl Generator for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationResponse, GenerationError> {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": [
                ApiMessage { role: "system".into(), content: request.system },
                ApiMessage { role: "user".into(), content: request.prompt },
            ],
            "temperature": request.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.post("chat/completions").json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                GenerationError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(GenerationError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(GenerationError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Generation endpoint returned error");
            return Err(GenerationError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| GenerationError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let text = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)?;

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(GenerationResponse {
            text,
            usage,
            model: api_response.model,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": [text],
            "encoding_format": "float",
        });

        debug!(
            provider = %self.name,
            model = %self.embedding_model,
            chars = text.len(),
            "Sending embedding request"
        );

        let response = self
            .post("embeddings")
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Transient(e.to_string()))?;

        let status = response.status().as_u16();
        match classify_embedding_status(status) {
            StatusClass::Ok => {}
            StatusClass::Transient => {
                let error_body = response.text().await.unwrap_or_default();
                return Err(EmbeddingError::Transient(format!("status {status}: {error_body}")));
            }
            StatusClass::Fatal => {
                let error_body = response.text().await.unwrap_or_default();
                warn!(status, body = %error_body, "Embedding endpoint rejected request");
                return Err(EmbeddingError::Unavailable(format!("status {status}: {error_body}")));
            }
        }

        let api_resp: EmbeddingApiResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Transient(format!("Failed to parse embedding response: {e}")))?;

        api_resp
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or(EmbeddingError::EmptyResponse)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StatusClass {
    Ok,
    Transient,
    Fatal,
}

/// Rate limits and server errors are worth retrying; auth and request errors are not.
fn classify_embedding_status(status: u16) -> StatusClass {
    match status {
        200 => StatusClass::Ok,
        408 | 429 | 500..=599 => StatusClass::Transient,
        _ => StatusClass::Fatal,
    }
}

// ── Wire types ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

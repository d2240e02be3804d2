//! Error types for the Greenlight domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

use crate::retrieval::RetrievalSource;

/// The top-level error type for all Greenlight operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Embedding errors ---
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    // --- Generation errors ---
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    // --- Conversation store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Orchestration ---
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Turn exceeded its time budget of {timeout_secs}s")]
    TurnTimeout { timeout_secs: u64 },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller may retry the whole turn.
    ///
    /// Generation timeouts and turn timeouts are surfaced as retryable;
    /// the engine itself never retries them.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Generation(e) => e.is_retryable(),
            Error::TurnTimeout { .. } => true,
            Error::Store(StoreError::Storage(_)) => true,
            _ => false,
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the structured store or the vector index.
///
/// These are absorbed by the orchestrator: the turn continues in
/// degraded single-source mode.
#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("{retriever} source unavailable: {reason}")]
    SourceUnavailable {
        retriever: RetrievalSource,
        reason: String,
    },

    #[error("{retriever} source timed out after {timeout_ms}ms")]
    Timeout {
        retriever: RetrievalSource,
        timeout_ms: u64,
    },
}

impl RetrievalError {
    /// Which retrieval path failed.
    pub fn retriever(&self) -> RetrievalSource {
        match self {
            RetrievalError::SourceUnavailable { retriever, .. } => *retriever,
            RetrievalError::Timeout { retriever, .. } => *retriever,
        }
    }
}

/// Failures of the embedding capability.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    /// A transient failure (network blip, rate limit). Safe to retry.
    #[error("Transient embedding failure: {0}")]
    Transient(String),

    /// The capability is down or misconfigured. Never retried.
    #[error("Embedding capability unavailable: {0}")]
    Unavailable(String),

    #[error("Embedding failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("Embedding response was empty")]
    EmptyResponse,
}

/// Failures of the generation capability.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Generation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by generation endpoint, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Generation capability not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Generation returned no text")]
    EmptyResponse,
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Timeout { .. }
                | GenerationError::RateLimited { .. }
                | GenerationError::Network(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Corrupt turn record {turn_id}: {reason}")]
    Corrupt { turn_id: String, reason: String },
}

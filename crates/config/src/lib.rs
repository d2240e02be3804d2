//! Configuration loading, validation, and management for Greenlight.
//!
//! Loads configuration from `~/.greenlight/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.greenlight/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Generation capability endpoint
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Embedding capability endpoint
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Embedding cache sizing
    #[serde(default)]
    pub cache: CacheConfig,

    /// Retriever limits and timeouts
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Fusion and deduplication
    #[serde(default)]
    pub fusion: FusionConfig,

    /// Conversation memory layers and turn log
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Answer scoring and regeneration
    #[serde(default)]
    pub answer: AnswerConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_generation_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-call timeout. Timed-out generations fail the turn.
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

fn default_generation_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.4
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_generation_timeout() -> u64 {
    60
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            model: default_generation_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl std::fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Total attempts for transient failures (first call included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles each retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    200
}
fn default_embedding_timeout() -> u64 {
    10
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            model: default_embedding_model(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl std::fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff_ms", &self.initial_backoff_ms)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached embeddings. Strict LRU, no TTL.
    #[serde(default = "default_cache_capacity")]
    pub capacity: u64,
}

fn default_cache_capacity() -> u64 {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_similarity_top_k")]
    pub similarity_top_k: usize,

    #[serde(default = "default_structured_limit")]
    pub structured_limit: usize,

    /// A retriever exceeding this is treated as unavailable for the turn.
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
}

fn default_similarity_top_k() -> usize {
    8
}
fn default_structured_limit() -> usize {
    8
}
fn default_source_timeout_ms() -> u64 {
    3000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_top_k: default_similarity_top_k(),
            structured_limit: default_structured_limit(),
            source_timeout_ms: default_source_timeout_ms(),
        }
    }
}

/// Which source wins when fused scores are within `tie_margin`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    Structured,
    Similarity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Maximum items handed to generation.
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,

    /// Cosine similarity at or above which two items are near-duplicates.
    #[serde(default = "default_threshold")]
    pub dedup_threshold: f32,

    /// Fixed score bonus for structured matches.
    #[serde(default = "default_structured_boost")]
    pub structured_boost: f32,

    /// Scores closer than this are "otherwise close" and fall to `tie_break`.
    #[serde(default = "default_tie_margin")]
    pub tie_margin: f32,

    #[serde(default)]
    pub tie_break: TieBreak,
}

fn default_context_budget() -> usize {
    6
}
fn default_threshold() -> f32 {
    0.85
}
fn default_structured_boost() -> f32 {
    0.1
}
fn default_tie_margin() -> f32 {
    0.05
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            context_budget: default_context_budget(),
            dedup_threshold: default_threshold(),
            structured_boost: default_structured_boost(),
            tie_margin: default_tie_margin(),
            tie_break: TieBreak::default(),
        }
    }
}

/// Where the turn log lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStoreKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Turns kept verbatim in every prompt.
    #[serde(default = "default_working_window")]
    pub working_window: usize,

    /// Turns summarized as entity coverage.
    #[serde(default = "default_short_term_window")]
    pub short_term_window: usize,

    /// Mention count at which an entity is excluded from novelty-seeking turns.
    #[serde(default = "default_saturation_mentions")]
    pub saturation_mentions: u32,

    #[serde(default)]
    pub store: TurnStoreKind,

    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_working_window() -> usize {
    2
}
fn default_short_term_window() -> usize {
    5
}
fn default_saturation_mentions() -> u32 {
    3
}
fn default_database_path() -> String {
    EngineConfig::config_dir()
        .join("conversations.db")
        .to_string_lossy()
        .into_owned()
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            working_window: default_working_window(),
            short_term_window: default_short_term_window(),
            saturation_mentions: default_saturation_mentions(),
            store: TurnStoreKind::default(),
            database_path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerConfig {
    /// Repetition above this triggers regeneration.
    #[serde(default = "default_threshold")]
    pub repetition_threshold: f32,

    /// Regeneration attempts after the first generation. At most 2.
    #[serde(default = "default_max_regenerations")]
    pub max_regenerations: u32,

    #[serde(default = "default_follow_up_count")]
    pub follow_up_count: usize,

    /// Multiplier applied to the reported quality when a source was down.
    #[serde(default = "default_degraded_penalty")]
    pub degraded_penalty: f32,

    /// Upper bound on a whole turn, end to end.
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_secs: u64,
}

fn default_max_regenerations() -> u32 {
    2
}
fn default_follow_up_count() -> usize {
    3
}
fn default_degraded_penalty() -> f32 {
    0.75
}
fn default_turn_timeout() -> u64 {
    120
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            repetition_threshold: default_threshold(),
            max_regenerations: default_max_regenerations(),
            follow_up_count: default_follow_up_count(),
            degraded_penalty: default_degraded_penalty(),
            turn_timeout_secs: default_turn_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "default_true")]
    pub with_target: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            with_target: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default path (~/.greenlight/config.toml).
    ///
    /// Also checks environment variables:
    /// - `GREENLIGHT_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `GREENLIGHT_API_URL`
    /// - `GREENLIGHT_MODEL`
    /// - `GREENLIGHT_EMBEDDING_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        let api_key = std::env::var("GREENLIGHT_API_KEY")
            .ok()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        if let Some(key) = api_key {
            if self.generation.api_key.is_none() {
                self.generation.api_key = Some(key.clone());
            }
            if self.embedding.api_key.is_none() {
                self.embedding.api_key = Some(key);
            }
        }

        if let Ok(url) = std::env::var("GREENLIGHT_API_URL") {
            self.generation.api_url = url.clone();
            self.embedding.api_url = url;
        }

        if let Ok(model) = std::env::var("GREENLIGHT_MODEL") {
            self.generation.model = model;
        }

        if let Ok(model) = std::env::var("GREENLIGHT_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".greenlight")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::ValidationError(
                "generation.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        for (name, value) in [
            ("fusion.dedup_threshold", self.fusion.dedup_threshold),
            ("answer.repetition_threshold", self.answer.repetition_threshold),
            ("answer.degraded_penalty", self.answer.degraded_penalty),
        ] {
            if value <= 0.0 || value > 1.0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be in (0, 1], got {value}"
                )));
            }
        }

        if self.answer.max_regenerations > 2 {
            return Err(ConfigError::ValidationError(
                "answer.max_regenerations must be at most 2".into(),
            ));
        }

        if self.conversation.working_window == 0 {
            return Err(ConfigError::ValidationError(
                "conversation.working_window must be > 0".into(),
            ));
        }

        if self.conversation.working_window > 2 {
            return Err(ConfigError::ValidationError(format!(
                "conversation.working_window must be at most 2, got {}",
                self.conversation.working_window
            )));
        }

        if self.conversation.short_term_window > 5 {
            return Err(ConfigError::ValidationError(format!(
                "conversation.short_term_window must be at most 5, got {}",
                self.conversation.short_term_window
            )));
        }

        if self.conversation.working_window > self.conversation.short_term_window {
            return Err(ConfigError::ValidationError(
                "conversation.working_window must not exceed short_term_window".into(),
            ));
        }

        if self.cache.capacity == 0 {
            return Err(ConfigError::ValidationError("cache.capacity must be > 0".into()));
        }

        if self.fusion.context_budget == 0 {
            return Err(ConfigError::ValidationError(
                "fusion.context_budget must be > 0".into(),
            ));
        }

        if !(1..=3).contains(&self.embedding.max_attempts) {
            return Err(ConfigError::ValidationError(format!(
                "embedding.max_attempts must be between 1 and 3, got {}",
                self.embedding.max_attempts
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for greenlight_core::Error {
    fn from(e: ConfigError) -> Self {
        greenlight_core::Error::Config {
            message: e.to_string(),
        }
    }
}

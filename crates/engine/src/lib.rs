//! # Greenlight Engine
//!
//! The conversation-aware answer engine: prompt construction, quality and
//! repetition scoring, bounded regeneration, follow-up suggestions, and the
//! [`TurnProcessor`] that runs a turn end to end.
//!
//! ```text
//! TurnProcessor::process_turn
//!   ├── ConversationPlanner      (classify, rewrite, include/exclude)
//!   ├── StructuredRetriever ┐
//!   ├── SimilarityRetriever ┴─── concurrently, per-source timeout
//!   ├── FusionEngine
//!   ├── ProgressiveAnswerEngine  (generate → score → maybe regenerate)
//!   └── TurnStore::append
//! ```

pub mod answer;
pub mod follow_up;
pub mod logging;
pub mod orchestrator;
pub mod prompt;
pub mod scoring;

pub use answer::{AnswerDraft, INSUFFICIENT_INFORMATION, ProgressiveAnswerEngine};
pub use follow_up::suggest_follow_ups;
pub use logging::init_tracing;
pub use orchestrator::{TurnProcessor, TurnProcessorBuilder};
pub use prompt::{Prompt, PromptInput, build_prompt};
pub use scoring::{QualityScores, ScoreInput, repetition_score, score_answer};

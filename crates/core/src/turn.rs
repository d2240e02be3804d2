//! Turn and conversation domain types.
//!
//! A conversation is an append-only log of [`Turn`]s. Everything else about a
//! conversation (memory layers, coverage ledger) is derived from that log.
//!
//! Query → plan ([`PlannedQuery`]) → retrieve → answer → persist [`Turn`] →
//! return [`TurnOutcome`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::entity::{AttributeFilter, EntityId};
use crate::error::StoreError;
use crate::retrieval::RetrievalSource;

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the current query relates to earlier turns.
///
/// Recomputed from scratch on every turn; there is no stored "current state".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    /// No prior turn covers this topic.
    Initial,
    /// More detail about an entity already in working memory.
    DrillDown,
    /// Alternatives or breadth on the same topic.
    ExploreMore,
    /// Two or more entities side by side.
    Compare,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Initial => "INITIAL",
            QuestionType::DrillDown => "DRILL_DOWN",
            QuestionType::ExploreMore => "EXPLORE_MORE",
            QuestionType::Compare => "COMPARE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIAL" => Some(QuestionType::Initial),
            "DRILL_DOWN" => Some(QuestionType::DrillDown),
            "EXPLORE_MORE" => Some(QuestionType::ExploreMore),
            "COMPARE" => Some(QuestionType::Compare),
            _ => None,
        }
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The shape of answer to produce. Determined entirely by [`QuestionType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStrategy {
    StrategicAdvice,
    Depth,
    Breadth,
    Compare,
}

impl ResponseStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStrategy::StrategicAdvice => "STRATEGIC_ADVICE",
            ResponseStrategy::Depth => "DEPTH",
            ResponseStrategy::Breadth => "BREADTH",
            ResponseStrategy::Compare => "COMPARE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STRATEGIC_ADVICE" => Some(ResponseStrategy::StrategicAdvice),
            "DEPTH" => Some(ResponseStrategy::Depth),
            "BREADTH" => Some(ResponseStrategy::Breadth),
            "COMPARE" => Some(ResponseStrategy::Compare),
            _ => None,
        }
    }
}

impl From<QuestionType> for ResponseStrategy {
    fn from(question_type: QuestionType) -> Self {
        match question_type {
            QuestionType::Initial => ResponseStrategy::StrategicAdvice,
            QuestionType::DrillDown => ResponseStrategy::Depth,
            QuestionType::ExploreMore => ResponseStrategy::Breadth,
            QuestionType::Compare => ResponseStrategy::Compare,
        }
    }
}

/// The Conversation Manager's plan for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedQuery {
    pub raw_query: String,
    pub rewritten_query: String,
    pub question_type: QuestionType,
    pub response_strategy: ResponseStrategy,

    /// Structured constraints for the relationship store.
    pub filter: AttributeFilter,

    /// Entities the retrievers must surface. Takes precedence over `exclude`.
    pub include: BTreeSet<EntityId>,

    /// Entities the retrievers must not re-surface.
    pub exclude: BTreeSet<EntityId>,

    /// Requested detail level for DRILL_DOWN; 0 otherwise.
    pub target_depth: u32,

    /// Entities named in the raw query, in order of appearance.
    #[serde(default)]
    pub mentioned: Vec<EntityId>,
}

impl PlannedQuery {
    /// Whether an entity should be filtered out of retrieval results.
    pub fn is_excluded(&self, id: &EntityId) -> bool {
        self.exclude.contains(id) && !self.include.contains(id)
    }
}

/// One persisted request/response pair. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: String,
    pub conversation_id: ConversationId,
    pub user_id: String,

    /// Zero-based position in the conversation.
    pub sequence: u32,

    pub raw_query: String,
    pub rewritten_query: String,
    pub question_type: QuestionType,
    pub response_strategy: ResponseStrategy,

    #[serde(default)]
    pub attribute_filter: AttributeFilter,

    /// The plan's include set; DRILL_DOWN depth is tracked against it.
    #[serde(default)]
    pub focus_entities: BTreeSet<EntityId>,

    pub answer_text: String,

    /// Absent when the embedding capability was unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_embedding: Option<Vec<f32>>,

    /// Entities referenced by the answer, unique, in order of first mention.
    #[serde(default)]
    pub entities_covered: Vec<EntityId>,

    pub quality_score: f32,
    pub repetition_score: f32,

    #[serde(default)]
    pub regenerations: u32,

    #[serde(default)]
    pub flagged_repetitive: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_sources: Vec<RetrievalSource>,

    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// The first entity the answer mentions.
    pub fn primary_entity(&self) -> Option<&EntityId> {
        self.entities_covered.first()
    }
}

/// Non-fatal conditions attached to a turn's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnWarning {
    /// A retriever failed or timed out; the turn ran on the other source.
    SourceUnavailable { source: RetrievalSource },
    /// Both retrievers came back empty.
    NoContextFound,
    /// Regeneration attempts were exhausted while the answer stayed repetitive.
    RepetitionUnresolved,
    /// The answer could not be embedded, so repetition was not measured.
    RepetitionUnmeasured,
}

/// What `process_turn` returns to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub turn_id: String,
    pub conversation_id: ConversationId,
    pub answer_text: String,
    pub quality_score: f32,
    pub entities_referenced: Vec<EntityId>,
    pub follow_up_suggestions: Vec<String>,
    pub flagged_repetitive: bool,
    pub question_type: QuestionType,
    pub regenerations: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<TurnWarning>,
}

/// The durable, append-only turn log.
///
/// Implementations: in-memory (testing), SQLite.
#[async_trait]
pub trait TurnStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Append a turn to its conversation's log.
    async fn append(&self, turn: &Turn) -> std::result::Result<(), StoreError>;

    /// All turns of a conversation, ordered by `sequence`.
    async fn turns(
        &self,
        conversation_id: &ConversationId,
    ) -> std::result::Result<Vec<Turn>, StoreError>;

    /// Number of turns recorded for a conversation.
    async fn count(&self, conversation_id: &ConversationId)
    -> std::result::Result<usize, StoreError>;
}

//! Turn orchestration — `process_turn` end to end.
//!
//! ```text
//! load turns ─► project state ─► plan ─┬─► structured ─┐
//!                                      └─► similarity ─┴─► fuse ─► answer ─► append ─► events
//! ```
//!
//! Turns within one conversation are serialized by a per-conversation lock;
//! turns of different conversations run fully in parallel. The two retrievers
//! run concurrently, each bounded by its own timeout; a failed or slow source
//! degrades the turn instead of failing it. Structured items are embedded
//! for fusion after retrieval, outside the structured source's timeout.

use chrono::Utc;
use dashmap::DashMap;
use greenlight_config::{EngineConfig, TurnStoreKind};
use greenlight_conversation::{
    ConversationPlanner, ConversationState, EntityDirectory, InMemoryTurnStore,
};
use greenlight_core::entity::EntityStore;
use greenlight_core::error::{Error, RetrievalError};
use greenlight_core::event::{DomainEvent, EventBus};
use greenlight_core::provider::{Embedder, Generator};
use greenlight_core::retrieval::{RetrievalSource, RetrievedItem, VectorIndex};
use greenlight_core::turn::{ConversationId, Turn, TurnOutcome, TurnStore, TurnWarning};
use greenlight_retrieval::{
    CacheStats, EmbeddingCache, FusionEngine, SimilarityRetriever, StructuredRetriever,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::answer::ProgressiveAnswerEngine;
use crate::follow_up::suggest_follow_ups;

/// The engine's single entry point.
pub struct TurnProcessor {
    config: EngineConfig,
    planner: ConversationPlanner,
    structured: StructuredRetriever,
    similarity: SimilarityRetriever,
    fusion: FusionEngine,
    answers: ProgressiveAnswerEngine,
    entity_store: Arc<dyn EntityStore>,
    turn_store: Arc<dyn TurnStore>,
    cache: Arc<EmbeddingCache>,
    directory: RwLock<Arc<EntityDirectory>>,
    event_bus: Arc<EventBus>,
    locks: DashMap<ConversationId, Arc<Mutex<()>>>,
    source_timeout: Duration,
    turn_timeout: Duration,
}

impl TurnProcessor {
    pub fn builder(config: EngineConfig) -> TurnProcessorBuilder {
        TurnProcessorBuilder::new(config)
    }

    /// Answer one query within a conversation and persist the turn.
    ///
    /// Retriever failures degrade the turn; generation failures, store
    /// failures and the turn timeout are returned as errors, and nothing is
    /// persisted for a failed turn.
    pub async fn process_turn(
        &self,
        conversation_id: &ConversationId,
        user_id: &str,
        raw_query: &str,
    ) -> Result<TurnOutcome, Error> {
        if raw_query.trim().is_empty() {
            return Err(Error::InvalidQuery("query is empty".into()));
        }

        let lock = self
            .locks
            .entry(conversation_id.clone())
            .or_default()
            .clone();
        let guard = lock.lock().await;

        let result = match tokio::time::timeout(
            self.turn_timeout,
            self.run_turn(conversation_id, user_id, raw_query),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::TurnTimeout {
                timeout_secs: self.turn_timeout.as_secs(),
            }),
        };

        drop(guard);
        drop(lock);
        self.locks
            .remove_if(conversation_id, |_, l| Arc::strong_count(l) == 1);

        if let Err(e) = &result {
            warn!(conversation_id = %conversation_id, error = %e, "Turn failed");
            self.event_bus.publish(DomainEvent::TurnFailed {
                conversation_id: conversation_id.to_string(),
                error_message: e.to_string(),
                timestamp: Utc::now(),
            });
        }
        result
    }

    async fn run_turn(
        &self,
        conversation_id: &ConversationId,
        user_id: &str,
        raw_query: &str,
    ) -> Result<TurnOutcome, Error> {
        let turns = self.turn_store.turns(conversation_id).await?;
        let state = ConversationState::project(&turns, &self.config.conversation);
        let directory = self.directory.read().await.clone();

        let plan = self.planner.plan(raw_query, &state, &directory);
        info!(
            conversation_id = %conversation_id,
            question_type = %plan.question_type,
            include = plan.include.len(),
            exclude = plan.exclude.len(),
            "Processing turn"
        );

        // ── Retrieval: both sources concurrently, each under its own timeout ──
        let (structured, similarity) = tokio::join!(
            tokio::time::timeout(
                self.source_timeout,
                self.structured.query(&plan.filter, &plan.include, &plan.exclude),
            ),
            tokio::time::timeout(
                self.source_timeout,
                self.similarity.query(
                    &plan.rewritten_query,
                    self.config.retrieval.similarity_top_k,
                    &plan.include,
                    &plan.exclude,
                ),
            ),
        );

        let mut warnings = Vec::new();
        let mut degraded = Vec::new();
        let mut structured = self.settle(conversation_id, RetrievalSource::Structured, structured, &mut degraded);
        let similarity = self.settle(conversation_id, RetrievalSource::Similarity, similarity, &mut degraded);
        for source in &degraded {
            warnings.push(TurnWarning::SourceUnavailable { source: *source });
        }

        // ── Fusion ──
        // Missing structured embeddings only weaken paraphrase dedup.
        if tokio::time::timeout(
            self.source_timeout,
            self.structured.attach_embeddings(&mut structured),
        )
        .await
        .is_err()
        {
            debug!(conversation_id = %conversation_id, "Structured embeddings incomplete; fusing without them");
        }
        let context = self.fusion.fuse(
            &structured,
            &similarity,
            self.config.fusion.context_budget,
        );
        if context.is_empty() {
            warn!(conversation_id = %conversation_id, "No context found for turn");
            warnings.push(TurnWarning::NoContextFound);
        }

        // ── Answer ──
        let draft = self.answers.answer(&plan, &context, &state, &directory).await?;
        if draft.flagged_repetitive {
            warnings.push(TurnWarning::RepetitionUnresolved);
        }
        if !draft.repetition_measured {
            warnings.push(TurnWarning::RepetitionUnmeasured);
        }

        let quality_score = if degraded.is_empty() {
            draft.quality_score
        } else {
            draft.quality_score * self.config.answer.degraded_penalty
        };

        let follow_ups = suggest_follow_ups(
            &plan,
            &draft.entities,
            &directory,
            self.config.answer.follow_up_count,
        );

        // ── Persist ──
        let turn = Turn {
            turn_id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.clone(),
            user_id: user_id.to_string(),
            sequence: state.next_sequence(),
            raw_query: plan.raw_query.clone(),
            rewritten_query: plan.rewritten_query.clone(),
            question_type: plan.question_type,
            response_strategy: plan.response_strategy,
            attribute_filter: plan.filter.clone(),
            focus_entities: plan.include.clone(),
            answer_text: draft.text.clone(),
            answer_embedding: draft.embedding.clone(),
            entities_covered: draft.entities.clone(),
            quality_score,
            repetition_score: draft.repetition_score,
            regenerations: draft.regenerations,
            flagged_repetitive: draft.flagged_repetitive,
            degraded_sources: degraded.clone(),
            created_at: Utc::now(),
        };
        self.turn_store.append(&turn).await?;

        // ── Events ──
        if !turn.entities_covered.is_empty() {
            self.event_bus.publish(DomainEvent::EntitiesReferenced {
                conversation_id: conversation_id.to_string(),
                turn_id: turn.turn_id.clone(),
                entities: turn.entities_covered.clone(),
                timestamp: turn.created_at,
            });
        }
        self.event_bus.publish(DomainEvent::TurnCompleted {
            conversation_id: conversation_id.to_string(),
            turn_id: turn.turn_id.clone(),
            question_type: turn.question_type,
            quality_score,
            repetition_score: turn.repetition_score,
            regenerations: turn.regenerations,
            timestamp: turn.created_at,
        });

        info!(
            conversation_id = %conversation_id,
            sequence = turn.sequence,
            question_type = %turn.question_type,
            quality = quality_score,
            repetition = turn.repetition_score,
            regenerations = turn.regenerations,
            degraded = degraded.len(),
            "Turn completed"
        );

        Ok(TurnOutcome {
            turn_id: turn.turn_id,
            conversation_id: turn.conversation_id,
            answer_text: turn.answer_text,
            quality_score,
            entities_referenced: turn.entities_covered,
            follow_up_suggestions: follow_ups,
            flagged_repetitive: turn.flagged_repetitive,
            question_type: turn.question_type,
            regenerations: turn.regenerations,
            warnings,
        })
    }

    /// Turn a retriever's (possibly timed-out) result into items, recording
    /// degradation instead of failing.
    fn settle(
        &self,
        conversation_id: &ConversationId,
        source: RetrievalSource,
        result: Result<Result<Vec<RetrievedItem>, RetrievalError>, tokio::time::error::Elapsed>,
        degraded: &mut Vec<RetrievalSource>,
    ) -> Vec<RetrievedItem> {
        let error = match result {
            Ok(Ok(items)) => return items,
            Ok(Err(e)) => e,
            Err(_) => RetrievalError::Timeout {
                retriever: source,
                timeout_ms: u64::try_from(self.source_timeout.as_millis()).unwrap_or(u64::MAX),
            },
        };

        warn!(
            conversation_id = %conversation_id,
            source = %source,
            error = %error,
            "Retrieval source unavailable; continuing degraded"
        );
        self.event_bus.publish(DomainEvent::SourceDegraded {
            conversation_id: conversation_id.to_string(),
            source,
            reason: error.to_string(),
            timestamp: Utc::now(),
        });
        degraded.push(source);
        Vec::new()
    }

    /// The projected state of a conversation, rebuilt from its turn log.
    pub async fn conversation_state(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ConversationState, Error> {
        let turns = self.turn_store.turns(conversation_id).await?;
        Ok(ConversationState::project(&turns, &self.config.conversation))
    }

    /// Reload entity names and attribute vocabularies from the entity store.
    pub async fn refresh_directory(&self) -> Result<usize, Error> {
        let catalog = self.entity_store.catalog().await?;
        let directory = EntityDirectory::new(&catalog);
        let count = directory.len();
        *self.directory.write().await = Arc::new(directory);
        info!(entities = count, "Entity directory refreshed");
        Ok(count)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Explicit wiring for a [`TurnProcessor`].
///
/// The entity store and vector index are required. The generator and
/// embedder default to HTTP adapters built from the config; the turn store
/// defaults to the backend the config names.
pub struct TurnProcessorBuilder {
    config: EngineConfig,
    generator: Option<Arc<dyn Generator>>,
    embedder: Option<Arc<dyn Embedder>>,
    entity_store: Option<Arc<dyn EntityStore>>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    turn_store: Option<Arc<dyn TurnStore>>,
    event_bus: Option<Arc<EventBus>>,
}

impl TurnProcessorBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            generator: None,
            embedder: None,
            entity_store: None,
            vector_index: None,
            turn_store: None,
            event_bus: None,
        }
    }

    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// The raw embedding capability. It is always wrapped in the embedding cache.
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn entity_store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.entity_store = Some(store);
        self
    }

    pub fn vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    pub fn turn_store(mut self, store: Arc<dyn TurnStore>) -> Self {
        self.turn_store = Some(store);
        self
    }

    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub async fn build(self) -> Result<TurnProcessor, Error> {
        let config = self.config;
        config.validate()?;

        let entity_store = self.entity_store.ok_or_else(|| Error::Config {
            message: "an entity store is required".into(),
        })?;
        let vector_index = self.vector_index.ok_or_else(|| Error::Config {
            message: "a vector index is required".into(),
        })?;

        let generator = self
            .generator
            .unwrap_or_else(|| greenlight_providers::build_generator(&config));
        let raw_embedder = self
            .embedder
            .unwrap_or_else(|| greenlight_providers::build_embedder(&config));
        let cache = Arc::new(EmbeddingCache::new(raw_embedder, config.cache.capacity));
        let embedder: Arc<dyn Embedder> = cache.clone();

        let turn_store = match self.turn_store {
            Some(store) => store,
            None => open_turn_store(&config).await?,
        };

        let directory = match entity_store.catalog().await {
            Ok(catalog) => EntityDirectory::new(&catalog),
            Err(e) => {
                warn!(error = %e, "Entity catalog unavailable; mention detection disabled until refresh");
                EntityDirectory::empty()
            }
        };

        info!(
            entity_store = %entity_store.name(),
            vector_index = %vector_index.name(),
            turn_store = %turn_store.name(),
            generator = %generator.name(),
            entities = directory.len(),
            "Turn processor ready"
        );

        Ok(TurnProcessor {
            planner: ConversationPlanner::new(&config.conversation),
            structured: StructuredRetriever::new(entity_store.clone(), config.retrieval.structured_limit)
                .with_embedder(embedder.clone()),
            similarity: SimilarityRetriever::new(embedder.clone(), vector_index),
            fusion: FusionEngine::new(&config.fusion),
            answers: ProgressiveAnswerEngine::new(
                generator,
                embedder,
                &config.generation,
                &config.answer,
            ),
            entity_store,
            turn_store,
            cache,
            directory: RwLock::new(Arc::new(directory)),
            event_bus: self.event_bus.unwrap_or_default(),
            locks: DashMap::new(),
            source_timeout: Duration::from_millis(config.retrieval.source_timeout_ms),
            turn_timeout: Duration::from_secs(config.answer.turn_timeout_secs),
            config,
        })
    }
}

async fn open_turn_store(config: &EngineConfig) -> Result<Arc<dyn TurnStore>, Error> {
    match config.conversation.store {
        TurnStoreKind::Memory => Ok(Arc::new(InMemoryTurnStore::new())),
        #[cfg(feature = "sqlite")]
        TurnStoreKind::Sqlite => {
            let store =
                greenlight_conversation::SqliteTurnStore::open(&config.conversation.database_path)
                    .await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        TurnStoreKind::Sqlite => Err(Error::Config {
            message: "the sqlite turn store requires the `sqlite` feature".into(),
        }),
    }
}

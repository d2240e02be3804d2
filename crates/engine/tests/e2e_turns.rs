//! End-to-end tests for the Greenlight turn pipeline.
//!
//! These tests drive `TurnProcessor::process_turn` over in-memory stores with
//! a deterministic bag-of-words embedder and a generator that answers from
//! whatever context the prompt carries.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use greenlight_config::{EngineConfig, TurnStoreKind};
use greenlight_conversation::{ConversationState, EntityDirectory};
use greenlight_core::entity::{
    AttributeFilter, Entity, EntityAttributes, EntityId, EntityKind, EntityStore,
};
use greenlight_core::error::{EmbeddingError, Error, GenerationError, RetrievalError};
use greenlight_core::event::DomainEvent;
use greenlight_core::provider::{Embedder, GenerationRequest, GenerationResponse, Generator};
use greenlight_core::retrieval::{RetrievalSource, RetrievedItem, VectorIndex};
use greenlight_core::turn::{
    ConversationId, PlannedQuery, QuestionType, ResponseStrategy, Turn, TurnWarning,
};
use greenlight_engine::{INSUFFICIENT_INFORMATION, ProgressiveAnswerEngine, TurnProcessor};
use greenlight_providers::RetryingEmbedder;
use greenlight_retrieval::{InMemoryEntityStore, InMemoryVectorIndex, Passage};

// ── Mock Capabilities ────────────────────────────────────────────────────

/// Hashes each word into one of 512 buckets. Identical texts embed identically.
struct BagOfWordsEmbedder;

#[async_trait]
impl Embedder for BagOfWordsEmbedder {
    fn name(&self) -> &str {
        "bag_of_words"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut v = vec![0.0f32; 512];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            v[bucket(&word.to_lowercase())] += 1.0;
        }
        Ok(v)
    }
}

fn bucket(word: &str) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % 512) as usize
}

/// An embedding capability that never succeeds.
struct FailingEmbedder {
    transient: bool,
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.transient {
            Err(EmbeddingError::Transient("connection reset".into()))
        } else {
            Err(EmbeddingError::Unavailable("embedding endpoint offline".into()))
        }
    }
}

/// Answers from the prompt's context section.
///
/// Recommends the first context title not named in the "## Avoid" section;
/// comparison prompts name the first two titles.
struct EchoGenerator {
    calls: AtomicUsize,
    prompts: Mutex<Vec<GenerationRequest>>,
    fixed: Option<String>,
    delay: Option<Duration>,
}

impl EchoGenerator {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            fixed: None,
            delay: None,
        }
    }

    /// Always answers with the same text, whatever the prompt.
    fn fixed(text: &str) -> Self {
        Self {
            fixed: Some(text.to_string()),
            ..Self::new()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_prompt(&self) -> GenerationRequest {
        self.prompts.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl Generator for EchoGenerator {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.clone());

        let text = match &self.fixed {
            Some(text) => text.clone(),
            None => {
                let avoid = section(&request.prompt, "## Avoid");
                let titles: Vec<String> = context_titles(&request.prompt)
                    .into_iter()
                    .filter(|t| !avoid.contains(t.as_str()))
                    .collect();
                match titles.as_slice() {
                    [] => "Nothing relevant.".to_string(),
                    [a, b, ..] if request.system.contains("side-by-side") => format!("{a} versus {b}."),
                    [first, ..] => format!("Contact {first}."),
                }
            }
        };

        Ok(GenerationResponse {
            text,
            usage: None,
            model: "echo".into(),
        })
    }
}

/// Titles of the numbered context lines: `N. [source] Title: text`.
fn context_titles(prompt: &str) -> Vec<String> {
    section(prompt, "## Context")
        .lines()
        .filter_map(|line| {
            let rest = line.split_once("] ")?.1;
            Some(rest.split_once(": ")?.0.to_string())
        })
        .collect()
}

fn section<'a>(prompt: &'a str, heading: &str) -> &'a str {
    let Some(start) = prompt.find(heading) else {
        return "";
    };
    let body = &prompt[start + heading.len()..];
    match body.find("\n## ") {
        Some(end) => &body[..end],
        None => body,
    }
}

/// A vector index that never answers in time.
struct StalledIndex;

#[async_trait]
impl VectorIndex for StalledIndex {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn search(&self, _query: &[f32], _limit: usize) -> Result<Vec<RetrievedItem>, RetrievalError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(vec![])
    }
}

// ── Fixture ──────────────────────────────────────────────────────────────

fn person(id: &str, name: &str, region: &str, formats: &[&str], genres: &[&str], seniority: u8) -> Entity {
    Entity {
        id: EntityId::new(id),
        name: name.into(),
        kind: EntityKind::Person,
        aliases: vec![],
        attributes: EntityAttributes {
            region: Some(region.into()),
            title: Some("Commissioner".into()),
            formats: formats.iter().map(|f| f.to_string()).collect(),
            genres: genres.iter().map(|g| g.to_string()).collect(),
            seniority,
            default_contact: false,
            updated_at: None,
        },
        relationships: vec![],
    }
}

fn entities() -> Vec<Entity> {
    let mut studio = person("nordisk", "Nordisk Studio", "Nordics", &[], &[], 0);
    studio.kind = EntityKind::Organization;
    studio.attributes.title = Some("Studio".into());
    studio.attributes.default_contact = true;

    vec![
        person("maja", "Maja Lind", "Nordics", &["series"], &["crime", "drama"], 3),
        person("kai", "Kai Sato", "Nordics", &["series"], &["comedy"], 2),
        person("ola", "Ola Berg", "DACH", &["feature"], &["crime"], 2),
        studio,
    ]
}

fn passages() -> Vec<Passage> {
    let passage = |id: &str, title: &str, text: &str, refs: &[&str]| Passage {
        id: id.into(),
        title: title.into(),
        text: text.into(),
        entity_refs: refs.iter().map(|r| EntityId::new(*r)).collect(),
    };
    vec![
        passage("p1", "Slate notes", "Maja Lind is looking for Scandinavian crime thrillers with strong leads.", &["maja"]),
        passage("p2", "Comedy brief", "Kai Sato wants half-hour comedies for a young audience.", &["kai"]),
        passage("p3", "Feature fund", "Ola Berg finances crime features across German speaking territories.", &["ola"]),
        passage("p4", "Market overview", "Streaming buyers favour returning series with international casts.", &[]),
    ]
}

struct Fixture {
    processor: Arc<TurnProcessor>,
    generator: Arc<EchoGenerator>,
    entities: Arc<InMemoryEntityStore>,
    index: Arc<InMemoryVectorIndex>,
}

async fn fixture_with(generator: EchoGenerator, config: EngineConfig) -> Fixture {
    let generator = Arc::new(generator);
    let entities = Arc::new(InMemoryEntityStore::new(entities()));
    let index = Arc::new(
        InMemoryVectorIndex::from_passages(&BagOfWordsEmbedder, passages())
            .await
            .unwrap(),
    );

    let processor = TurnProcessor::builder(config)
        .generator(generator.clone())
        .embedder(Arc::new(BagOfWordsEmbedder))
        .entity_store(entities.clone())
        .vector_index(index.clone())
        .build()
        .await
        .unwrap();

    Fixture {
        processor: Arc::new(processor),
        generator,
        entities,
        index,
    }
}

async fn fixture() -> Fixture {
    fixture_with(EchoGenerator::new(), EngineConfig::default()).await
}

fn ids(names: &[&str]) -> BTreeSet<EntityId> {
    names.iter().map(|n| EntityId::new(*n)).collect()
}

const TURN_ONE: &str = "Who should I contact about the Nordics?";
const TURN_TWO: &str = "What other options are there?";
const TURN_THREE: &str = "Compare Maja Lind and Ola Berg";

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_first_turn_is_initial_with_one_primary() {
    let f = fixture().await;
    let conversation = ConversationId::from("a");

    let outcome = f.processor.process_turn(&conversation, "u1", TURN_ONE).await.unwrap();

    assert_eq!(outcome.question_type, QuestionType::Initial);
    assert_eq!(outcome.entities_referenced, vec![EntityId::new("maja")]);
    assert_eq!(outcome.answer_text, "Contact Maja Lind.");
    assert!(outcome.warnings.is_empty());
    assert!(!outcome.flagged_repetitive);
    assert!(!outcome.follow_up_suggestions.is_empty());

    let state = f.processor.conversation_state(&conversation).await.unwrap();
    let turn = state.last_turn().unwrap();
    assert_eq!(turn.repetition_score, 0.0);
    assert_eq!(turn.sequence, 0);
    assert_eq!(turn.response_strategy, ResponseStrategy::StrategicAdvice);
}

#[tokio::test]
async fn scenario_b_explore_excludes_turn_one_primary() {
    let f = fixture().await;
    let conversation = ConversationId::from("b");
    f.processor.process_turn(&conversation, "u1", TURN_ONE).await.unwrap();

    let outcome = f.processor.process_turn(&conversation, "u1", TURN_TWO).await.unwrap();

    assert_eq!(outcome.question_type, QuestionType::ExploreMore);
    assert_ne!(outcome.entities_referenced.first(), Some(&EntityId::new("maja")));
    assert!(!outcome.answer_text.contains("Maja Lind"));
    assert_eq!(outcome.answer_text, "Contact Kai Sato.");

    // The excluded primary never reached the generator's context.
    let prompt = f.generator.last_prompt();
    let titles = context_titles(&prompt.prompt);
    assert!(!titles.iter().any(|t| t == "Maja Lind" || t == "Slate notes"));
    assert!(prompt.prompt.contains("## Already covered"));
}

#[tokio::test]
async fn scenario_c_compare_includes_both_and_excludes_other_covered() {
    let f = fixture().await;
    let conversation = ConversationId::from("c");
    f.processor.process_turn(&conversation, "u1", TURN_ONE).await.unwrap();
    f.processor.process_turn(&conversation, "u1", TURN_TWO).await.unwrap();

    let outcome = f.processor.process_turn(&conversation, "u1", TURN_THREE).await.unwrap();

    assert_eq!(outcome.question_type, QuestionType::Compare);
    assert!(outcome.answer_text.contains("Maja Lind"));
    assert!(outcome.answer_text.contains("Ola Berg"));

    let state = f.processor.conversation_state(&conversation).await.unwrap();
    let turn = state.last_turn().unwrap();
    assert_eq!(turn.focus_entities, ids(&["maja", "ola"]));

    // Exclusion correctness: no context line is about Kai Sato.
    let prompt = f.generator.last_prompt();
    let context = section(&prompt.prompt, "## Context");
    assert!(!context.contains("Kai Sato"));
    let titles = context_titles(&prompt.prompt);
    assert_eq!(&titles[..2], &["Maja Lind".to_string(), "Ola Berg".to_string()]);
}

#[tokio::test]
async fn scenario_d_no_context_is_explicit() {
    let generator = Arc::new(EchoGenerator::new());
    let processor = TurnProcessor::builder(EngineConfig::default())
        .generator(generator.clone())
        .embedder(Arc::new(BagOfWordsEmbedder))
        .entity_store(Arc::new(InMemoryEntityStore::new(vec![])))
        .vector_index(Arc::new(InMemoryVectorIndex::new()))
        .build()
        .await
        .unwrap();

    let outcome = processor
        .process_turn(&ConversationId::from("d"), "u1", TURN_ONE)
        .await
        .unwrap();

    assert_eq!(outcome.answer_text, INSUFFICIENT_INFORMATION);
    assert!(outcome.warnings.contains(&TurnWarning::NoContextFound));
    assert!(outcome.entities_referenced.is_empty());
    assert!(outcome.quality_score < 0.5);
    assert_eq!(generator.calls(), 0);
}

// ── Properties ───────────────────────────────────────────────────────────

#[tokio::test]
async fn identical_query_with_same_context_is_repetitive_before_regeneration() {
    let config = EngineConfig::default();
    let generator = Arc::new(EchoGenerator::new());
    let engine = ProgressiveAnswerEngine::new(
        generator.clone(),
        Arc::new(BagOfWordsEmbedder),
        &config.generation,
        &config.answer,
    );
    let directory = EntityDirectory::new(&InMemoryEntityStore::new(entities()).catalog().await.unwrap());

    let plan = PlannedQuery {
        raw_query: TURN_ONE.into(),
        rewritten_query: TURN_ONE.into(),
        question_type: QuestionType::Initial,
        response_strategy: ResponseStrategy::StrategicAdvice,
        filter: AttributeFilter::default(),
        include: BTreeSet::new(),
        exclude: BTreeSet::new(),
        target_depth: 0,
        mentioned: vec![],
    };
    let context: Vec<RetrievedItem> = ["Maja Lind", "Kai Sato"]
        .iter()
        .map(|name| RetrievedItem {
            id: name.to_lowercase(),
            source: RetrievalSource::Structured,
            title: name.to_string(),
            text: format!("{name} commissions series."),
            score: 0.9,
            entity_refs: vec![],
            embedding: None,
            metadata: serde_json::Map::new(),
        })
        .collect();

    let empty = ConversationState::new(&config.conversation);
    let first = engine.answer(&plan, &context, &empty, &directory).await.unwrap();
    assert_eq!(first.repetition_score, 0.0);

    let prior = Turn {
        turn_id: "t0".into(),
        conversation_id: ConversationId::from("r"),
        user_id: "u1".into(),
        sequence: 0,
        raw_query: TURN_ONE.into(),
        rewritten_query: TURN_ONE.into(),
        question_type: QuestionType::Initial,
        response_strategy: ResponseStrategy::StrategicAdvice,
        attribute_filter: AttributeFilter::default(),
        focus_entities: BTreeSet::new(),
        answer_text: first.text.clone(),
        answer_embedding: first.embedding.clone(),
        entities_covered: first.entities.clone(),
        quality_score: first.quality_score,
        repetition_score: first.repetition_score,
        regenerations: 0,
        flagged_repetitive: false,
        degraded_sources: vec![],
        created_at: Utc::now(),
    };
    let state = ConversationState::project(&[prior], &config.conversation);

    let second = engine.answer(&plan, &context, &state, &directory).await.unwrap();
    assert!(second.initial_repetition_score >= 0.85);
    // The avoid list steers the regeneration to the next entity.
    assert_eq!(second.regenerations, 1);
    assert_eq!(second.text, "Contact Kai Sato.");
    assert!(second.repetition_score < 0.85);
}

#[tokio::test]
async fn regeneration_never_exceeds_two_attempts() {
    let f = fixture_with(EchoGenerator::fixed("Contact Maja Lind."), EngineConfig::default()).await;
    let conversation = ConversationId::from("bound");

    let first = f.processor.process_turn(&conversation, "u1", TURN_ONE).await.unwrap();
    assert_eq!(first.regenerations, 0);

    for _ in 0..3 {
        let outcome = f.processor.process_turn(&conversation, "u1", TURN_ONE).await.unwrap();
        assert_eq!(outcome.regenerations, 2);
        assert!(outcome.flagged_repetitive);
        assert!(outcome.warnings.contains(&TurnWarning::RepetitionUnresolved));
    }
    assert_eq!(f.generator.calls(), 1 + 3 * 3);
}

#[tokio::test]
async fn memory_layers_stay_contained_over_many_turns() {
    let f = fixture().await;
    let conversation = ConversationId::from("long");
    let queries = [TURN_ONE, TURN_TWO, TURN_THREE, "Tell me more about her", TURN_TWO, "Who covers DACH?", TURN_ONE];

    for query in queries {
        f.processor.process_turn(&conversation, "u1", query).await.unwrap();
        let state = f.processor.conversation_state(&conversation).await.unwrap();
        assert!(state.working().count() <= 2);
        assert!(state.short_term().count() <= 5);
        assert!(state.layers_consistent());
    }

    let state = f.processor.conversation_state(&conversation).await.unwrap();
    assert_eq!(state.turn_count(), queries.len());
    assert!(f.processor.cache_stats().hits > 0);
}

#[tokio::test]
async fn drill_down_increases_depth() {
    let f = fixture().await;
    let conversation = ConversationId::from("depth");
    f.processor.process_turn(&conversation, "u1", TURN_ONE).await.unwrap();

    let outcome = f
        .processor
        .process_turn(&conversation, "u1", "Tell me more about her")
        .await
        .unwrap();
    assert_eq!(outcome.question_type, QuestionType::DrillDown);

    let state = f.processor.conversation_state(&conversation).await.unwrap();
    assert_eq!(state.depth_level(&EntityId::new("maja")), 1);
    assert!(f.generator.last_prompt().system.contains("Go deeper on Maja Lind"));
}

// ── Degraded Mode ────────────────────────────────────────────────────────

#[tokio::test]
async fn structured_outage_degrades_but_answers() {
    let f = fixture().await;
    f.entities.set_available(false);

    let outcome = f
        .processor
        .process_turn(&ConversationId::from("deg"), "u1", TURN_ONE)
        .await
        .unwrap();

    assert!(outcome.warnings.contains(&TurnWarning::SourceUnavailable {
        source: RetrievalSource::Structured
    }));
    assert!(!outcome.answer_text.is_empty());

    let state = f.processor.conversation_state(&ConversationId::from("deg")).await.unwrap();
    assert_eq!(state.last_turn().unwrap().degraded_sources, vec![RetrievalSource::Structured]);
}

#[tokio::test]
async fn degraded_quality_is_penalized() {
    let healthy = fixture().await;
    let degraded = fixture().await;
    degraded.index.set_available(false);
    let mut events = degraded.processor.event_bus().subscribe();

    let normal = healthy.processor.process_turn(&ConversationId::from("n"), "u1", TURN_ONE).await.unwrap();
    let penalized = degraded.processor.process_turn(&ConversationId::from("n"), "u1", TURN_ONE).await.unwrap();

    // Same answer either way: the structured source alone ranks Maja Lind first.
    assert_eq!(normal.answer_text, penalized.answer_text);
    let expected = normal.quality_score * EngineConfig::default().answer.degraded_penalty;
    assert!((penalized.quality_score - expected).abs() < 1e-6);

    let first = events.try_recv().unwrap();
    assert!(matches!(
        first.as_ref(),
        DomainEvent::SourceDegraded { source: RetrievalSource::Similarity, .. }
    ));
    assert!(matches!(events.try_recv().unwrap().as_ref(), DomainEvent::EntitiesReferenced { .. }));
    assert!(matches!(events.try_recv().unwrap().as_ref(), DomainEvent::TurnCompleted { .. }));
}

#[tokio::test(start_paused = true)]
async fn stalled_source_times_out_without_failing_the_turn() {
    let mut config = EngineConfig::default();
    config.retrieval.source_timeout_ms = 100;

    let processor = TurnProcessor::builder(config)
        .generator(Arc::new(EchoGenerator::new()))
        .embedder(Arc::new(BagOfWordsEmbedder))
        .entity_store(Arc::new(InMemoryEntityStore::new(entities())))
        .vector_index(Arc::new(StalledIndex))
        .build()
        .await
        .unwrap();

    let outcome = processor
        .process_turn(&ConversationId::from("slow"), "u1", TURN_ONE)
        .await
        .unwrap();

    assert_eq!(outcome.answer_text, "Contact Maja Lind.");
    assert!(outcome.warnings.contains(&TurnWarning::SourceUnavailable {
        source: RetrievalSource::Similarity
    }));
}

#[tokio::test(start_paused = true)]
async fn generation_timeout_fails_the_turn_and_persists_nothing() {
    let mut config = EngineConfig::default();
    config.generation.timeout_secs = 1;
    let f = fixture_with(EchoGenerator::slow(Duration::from_secs(30)), config).await;
    let conversation = ConversationId::from("timeout");
    let mut events = f.processor.event_bus().subscribe();

    let err = f.processor.process_turn(&conversation, "u1", TURN_ONE).await.unwrap_err();

    assert!(matches!(err, Error::Generation(GenerationError::Timeout { timeout_secs: 1 })));
    assert!(err.is_retryable());
    assert!(f.processor.conversation_state(&conversation).await.unwrap().is_empty());
    assert!(matches!(events.try_recv().unwrap().as_ref(), DomainEvent::TurnFailed { .. }));
}

#[tokio::test(start_paused = true)]
async fn embedding_outage_only_degrades_the_similarity_path() {
    let mut catalog: Vec<Entity> = (0..9)
        .map(|i| {
            person(
                &format!("c{i}"),
                &format!("Consultant {i}"),
                "Nordics",
                &["series"],
                &["drama"],
                i as u8,
            )
        })
        .collect();
    catalog.extend(entities());
    let index = InMemoryVectorIndex::from_passages(&BagOfWordsEmbedder, passages())
        .await
        .unwrap();
    let retrying = RetryingEmbedder::new(
        Arc::new(FailingEmbedder { transient: true }),
        3,
        Duration::from_millis(200),
    );

    let processor = TurnProcessor::builder(EngineConfig::default())
        .generator(Arc::new(EchoGenerator::new()))
        .embedder(Arc::new(retrying))
        .entity_store(Arc::new(InMemoryEntityStore::new(catalog)))
        .vector_index(Arc::new(index))
        .build()
        .await
        .unwrap();

    let outcome = processor
        .process_turn(
            &ConversationId::from("outage"),
            "u1",
            "Who are the senior consultants in the Nordics?",
        )
        .await
        .unwrap();

    assert!(outcome.warnings.contains(&TurnWarning::SourceUnavailable {
        source: RetrievalSource::Similarity
    }));
    assert!(!outcome.warnings.contains(&TurnWarning::SourceUnavailable {
        source: RetrievalSource::Structured
    }));
    assert!(!outcome.warnings.contains(&TurnWarning::NoContextFound));
    assert!(outcome.answer_text.starts_with("Contact "), "{}", outcome.answer_text);
    assert_ne!(outcome.answer_text, INSUFFICIENT_INFORMATION);
}

#[tokio::test]
async fn repeated_answer_without_embeddings_is_not_scored_novel() {
    let processor = TurnProcessor::builder(EngineConfig::default())
        .generator(Arc::new(EchoGenerator::fixed("Contact Maja Lind.")))
        .embedder(Arc::new(FailingEmbedder { transient: false }))
        .entity_store(Arc::new(InMemoryEntityStore::new(entities())))
        .vector_index(Arc::new(InMemoryVectorIndex::new()))
        .build()
        .await
        .unwrap();
    let conversation = ConversationId::from("blind");

    processor.process_turn(&conversation, "u1", TURN_ONE).await.unwrap();
    let second = processor.process_turn(&conversation, "u1", TURN_ONE).await.unwrap();

    assert_eq!(second.answer_text, "Contact Maja Lind.");
    assert!(second.warnings.contains(&TurnWarning::RepetitionUnmeasured));
    assert!(!second.flagged_repetitive);
    assert_eq!(second.regenerations, 0);
    // No novelty credit, and the similarity outage penalty applies.
    assert!(second.quality_score < 0.3, "quality {}", second.quality_score);

    let state = processor.conversation_state(&conversation).await.unwrap();
    assert!(state.last_turn().unwrap().answer_embedding.is_none());
}

// ── Concurrency & Persistence ────────────────────────────────────────────

#[tokio::test]
async fn turns_in_one_conversation_are_serialized() {
    let f = fixture().await;
    let conversation = ConversationId::from("race");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let processor = f.processor.clone();
            let conversation = conversation.clone();
            tokio::spawn(async move { processor.process_turn(&conversation, "u1", TURN_ONE).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let state = f.processor.conversation_state(&conversation).await.unwrap();
    assert_eq!(state.turn_count(), 4);
    assert_eq!(state.next_sequence(), 4);
}

#[tokio::test]
async fn conversations_are_independent() {
    let f = fixture().await;
    let x = ConversationId::from("x");
    let y = ConversationId::from("y");
    let (a, b) = tokio::join!(
        f.processor.process_turn(&x, "u1", TURN_ONE),
        f.processor.process_turn(&y, "u2", TURN_ONE),
    );
    // Neither conversation's coverage leaks into the other.
    assert_eq!(a.unwrap().answer_text, "Contact Maja Lind.");
    assert_eq!(b.unwrap().answer_text, "Contact Maja Lind.");
}

#[tokio::test]
async fn sqlite_turn_log_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.conversation.store = TurnStoreKind::Sqlite;
    config.conversation.database_path = dir.path().join("turns.db").to_string_lossy().into_owned();
    let conversation = ConversationId::from("durable");

    {
        let f = fixture_with(EchoGenerator::new(), config.clone()).await;
        f.processor.process_turn(&conversation, "u1", TURN_ONE).await.unwrap();
    }

    let f = fixture_with(EchoGenerator::new(), config).await;
    let outcome = f.processor.process_turn(&conversation, "u1", TURN_TWO).await.unwrap();
    assert_eq!(outcome.question_type, QuestionType::ExploreMore);
    assert_eq!(outcome.answer_text, "Contact Kai Sato.");

    let state = f.processor.conversation_state(&conversation).await.unwrap();
    assert_eq!(state.turn_count(), 2);
}

// ── Input Validation ─────────────────────────────────────────────────────

#[tokio::test]
async fn empty_query_is_rejected() {
    let f = fixture().await;
    let err = f
        .processor
        .process_turn(&ConversationId::from("e"), "u1", "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidQuery(_)));
    assert_eq!(f.generator.calls(), 0);
}

#[tokio::test]
async fn directory_refresh_reloads_catalog() {
    let f = fixture().await;
    assert_eq!(f.processor.refresh_directory().await.unwrap(), 4);

    f.entities.set_available(false);
    assert!(matches!(
        f.processor.refresh_directory().await,
        Err(Error::Retrieval(RetrievalError::SourceUnavailable { .. }))
    ));
}

#[tokio::test]
async fn builder_requires_stores() {
    let result = TurnProcessor::builder(EngineConfig::default())
        .generator(Arc::new(EchoGenerator::new()))
        .embedder(Arc::new(BagOfWordsEmbedder))
        .build()
        .await;
    assert!(matches!(result, Err(Error::Config { .. })));
}

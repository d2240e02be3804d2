//! Progressive Answer Engine — generate, score, and regenerate when repetitive.
//!
//! # Flow
//!
//! 1. Empty context → the fixed insufficient-information answer; the
//!    generation capability is not called
//! 2. Build the strategy prompt and call the generator under a timeout
//! 3. Embed the answer and score repetition against every prior answer
//! 4. If repetition exceeds the threshold (and this is not a comparison),
//!    regenerate with an avoid list; at most `max_regenerations` times
//! 5. Keep the least repetitive candidate; flag it if still over threshold
//!
//! Attempts are strictly sequential: each regeneration is conditioned on the
//! previous candidate's score.

use greenlight_config::{AnswerConfig, GenerationConfig};
use greenlight_conversation::{ConversationState, EntityDirectory};
use greenlight_core::entity::EntityId;
use greenlight_core::error::GenerationError;
use greenlight_core::provider::{Embedder, GenerationRequest, Generator};
use greenlight_core::retrieval::RetrievedItem;
use greenlight_core::turn::{PlannedQuery, QuestionType};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::prompt::{PromptInput, build_prompt};
use crate::scoring::{QualityScores, ScoreInput, repetition_score, score_answer};

/// Returned verbatim when neither retriever produced context.
pub const INSUFFICIENT_INFORMATION: &str = "I don't have enough information to answer \
that reliably. Neither the relationship data nor the document index returned anything \
relevant. Try naming a region, format or genre, or a specific company or person.";

/// The engine's result for one turn, before persistence.
#[derive(Debug, Clone)]
pub struct AnswerDraft {
    pub text: String,
    /// `None` when the embedding capability was unavailable.
    pub embedding: Option<Vec<f32>>,
    /// Entities the answer names, in order of first mention.
    pub entities: Vec<EntityId>,
    pub scores: QualityScores,
    pub quality_score: f32,
    /// Repetition of the kept candidate; 0.0 when unmeasured.
    pub repetition_score: f32,
    /// False when the answer could not be embedded, so repetition against
    /// earlier answers is unknown.
    pub repetition_measured: bool,
    /// Repetition of the first candidate, before any regeneration.
    pub initial_repetition_score: f32,
    pub regenerations: u32,
    pub flagged_repetitive: bool,
    /// True when the answer is the fixed insufficient-information response.
    pub insufficient_context: bool,
}

pub struct ProgressiveAnswerEngine {
    generator: Arc<dyn Generator>,
    embedder: Arc<dyn Embedder>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    generation_timeout: Duration,
    repetition_threshold: f32,
    max_regenerations: u32,
}

impl ProgressiveAnswerEngine {
    pub fn new(
        generator: Arc<dyn Generator>,
        embedder: Arc<dyn Embedder>,
        generation: &GenerationConfig,
        answer: &AnswerConfig,
    ) -> Self {
        Self {
            generator,
            embedder,
            model: generation.model.clone(),
            temperature: generation.temperature,
            max_tokens: generation.max_tokens,
            generation_timeout: Duration::from_secs(generation.timeout_secs),
            repetition_threshold: answer.repetition_threshold,
            max_regenerations: answer.max_regenerations.min(2),
        }
    }

    /// Override the generation timeout.
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn max_regenerations(&self) -> u32 {
        self.max_regenerations
    }

    /// Produce the answer for one planned turn.
    ///
    /// Only generation failures are returned as errors. An unavailable
    /// embedding capability leaves the answer without an embedding; its
    /// repetition is reported unmeasured and it earns no novelty.
    pub async fn answer(
        &self,
        plan: &PlannedQuery,
        context: &[RetrievedItem],
        state: &ConversationState,
        directory: &EntityDirectory,
    ) -> Result<AnswerDraft, GenerationError> {
        let working_text = state.render_working();

        if context.is_empty() {
            info!(question_type = %plan.question_type, "No context found; answering with insufficient information");
            let candidate = self
                .evaluate(INSUFFICIENT_INFORMATION.to_string(), state, directory, &working_text)
                .await;
            return Ok(AnswerDraft {
                initial_repetition_score: candidate.repetition.unwrap_or(0.0),
                insufficient_context: true,
                ..candidate.into_draft(0, false)
            });
        }

        let mut best: Option<Candidate> = None;
        let mut initial_repetition = 0.0;
        let mut avoid: Vec<EntityId> = Vec::new();
        let mut attempts: u32 = 0;

        loop {
            let prompt = build_prompt(&PromptInput {
                plan,
                context,
                state,
                directory,
                avoid: &avoid,
            });
            let text = self.generate(prompt.system, prompt.user).await?;
            let candidate = self.evaluate(text, state, directory, &working_text).await;
            attempts += 1;

            if attempts == 1 {
                initial_repetition = candidate.repetition.unwrap_or(0.0);
            }
            debug!(
                attempt = attempts,
                repetition = ?candidate.repetition,
                quality = candidate.scores.overall(),
                "Scored candidate answer"
            );

            // Unmeasured repetition gives a regeneration nothing to improve on.
            let acceptable = candidate
                .repetition
                .is_none_or(|r| r <= self.repetition_threshold)
                || plan.question_type == QuestionType::Compare;

            if acceptable {
                best = Some(candidate);
                break;
            }

            avoid = avoid_list(plan, state, &candidate.entities, &avoid);
            best = Some(match best.take() {
                Some(current) if !candidate.beats(&current) => current,
                _ => candidate,
            });

            if attempts > self.max_regenerations {
                break;
            }
        }

        let regenerations = attempts.saturating_sub(1);
        let Some(best) = best else {
            return Err(GenerationError::EmptyResponse);
        };
        let flagged = best.repetition.is_some_and(|r| r > self.repetition_threshold)
            && plan.question_type != QuestionType::Compare;

        if flagged {
            warn!(
                repetition = ?best.repetition,
                regenerations, "Repetition unresolved after regeneration"
            );
        }

        Ok(AnswerDraft {
            initial_repetition_score: initial_repetition,
            ..best.into_draft(regenerations, flagged)
        })
    }

    async fn generate(&self, system: String, prompt: String) -> Result<String, GenerationError> {
        let request = GenerationRequest {
            model: self.model.clone(),
            system,
            prompt,
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
        };

        let response = tokio::time::timeout(self.generation_timeout, self.generator.generate(request))
            .await
            .map_err(|_| GenerationError::Timeout {
                timeout_secs: self.generation_timeout.as_secs(),
            })??;

        let text = response.text.trim().to_string();
        if text.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(text)
    }

    async fn evaluate(
        &self,
        text: String,
        state: &ConversationState,
        directory: &EntityDirectory,
        working_text: &str,
    ) -> Candidate {
        let embedding = match self.embedder.embed(&text).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(embedder = %self.embedder.name(), error = %e, "Answer embedding failed; repetition not measured");
                None
            }
        };
        let repetition = embedding
            .as_deref()
            .map(|e| repetition_score(e, state.prior_answer_embeddings()));
        let entities = directory.find_mentions(&text);
        let scores = score_answer(&ScoreInput {
            answer: &text,
            entity_count: entities.len(),
            working_text,
            repetition,
        });

        Candidate {
            text,
            embedding,
            entities,
            scores,
            repetition,
        }
    }
}

struct Candidate {
    text: String,
    embedding: Option<Vec<f32>>,
    entities: Vec<EntityId>,
    scores: QualityScores,
    /// `None` when the answer could not be embedded.
    repetition: Option<f32>,
}

impl Candidate {
    /// Lower repetition wins; quality breaks exact ties.
    fn beats(&self, other: &Candidate) -> bool {
        let (mine, theirs) = (self.repetition.unwrap_or(0.0), other.repetition.unwrap_or(0.0));
        match mine.total_cmp(&theirs) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => self.scores.overall() > other.scores.overall(),
        }
    }

    fn into_draft(self, regenerations: u32, flagged_repetitive: bool) -> AnswerDraft {
        AnswerDraft {
            quality_score: self.scores.overall(),
            text: self.text,
            embedding: self.embedding,
            entities: self.entities,
            scores: self.scores,
            repetition_score: self.repetition.unwrap_or(0.0),
            repetition_measured: self.repetition.is_some(),
            initial_repetition_score: self.repetition.unwrap_or(0.0),
            regenerations,
            flagged_repetitive,
            insufficient_context: false,
        }
    }
}

/// Entities a regeneration should steer away from: everything already
/// covered plus what the rejected draft named, minus the plan's include set.
fn avoid_list(
    plan: &PlannedQuery,
    state: &ConversationState,
    rejected: &[EntityId],
    previous: &[EntityId],
) -> Vec<EntityId> {
    let mut avoid: Vec<EntityId> = previous.to_vec();
    for id in state.covered_entities().iter().chain(rejected) {
        if !plan.include.contains(id) && !avoid.contains(id) {
            avoid.push(id.clone());
        }
    }
    avoid
}

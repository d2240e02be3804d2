//! ConversationState — a pure projection over a conversation's turn log.
//!
//! Three memory layers:
//! - working: the last `working_window` turns, verbatim
//! - short-term: the last `short_term_window` turns, entity coverage only
//! - long-term: the coverage ledger over the whole conversation
//!
//! `project` and repeated `apply` produce identical states, so the state can
//! always be rebuilt from the [`TurnStore`](greenlight_core::TurnStore).

use greenlight_config::ConversationConfig;
use greenlight_core::entity::{AttributeFilter, EntityId};
use greenlight_core::turn::{QuestionType, Turn};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// One entity's row in the long-term ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageEntry {
    /// Turn in which the entity was first referenced.
    pub first_seen_turn: String,
    pub first_seen_sequence: u32,
    pub mention_count: u32,
    pub last_turn_id: String,
    /// Incremented once per DRILL_DOWN turn focused on the entity. Never decreases.
    pub depth_level: u32,
}

/// A short-term memory row: which entities a turn covered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSummary {
    pub turn_id: String,
    pub sequence: u32,
    pub question_type: QuestionType,
    pub entities: Vec<EntityId>,
}

#[derive(Debug, Clone)]
pub struct ConversationState {
    working_window: usize,
    short_term_window: usize,
    turn_count: usize,
    next_sequence: u32,
    working: VecDeque<Turn>,
    short_term: VecDeque<TurnSummary>,
    ledger: BTreeMap<EntityId, CoverageEntry>,
    prior_embeddings: Vec<Vec<f32>>,
}

impl ConversationState {
    pub fn new(config: &ConversationConfig) -> Self {
        Self {
            working_window: config.working_window.max(1),
            short_term_window: config.short_term_window.max(config.working_window.max(1)),
            turn_count: 0,
            next_sequence: 0,
            working: VecDeque::new(),
            short_term: VecDeque::new(),
            ledger: BTreeMap::new(),
            prior_embeddings: Vec::new(),
        }
    }

    /// Rebuild the state from a turn log. Turns are applied in sequence order.
    pub fn project(turns: &[Turn], config: &ConversationConfig) -> Self {
        let mut ordered: Vec<&Turn> = turns.iter().collect();
        ordered.sort_by_key(|t| t.sequence);

        let mut state = Self::new(config);
        for turn in ordered {
            state.apply(turn);
        }
        state
    }

    /// Fold one more turn into every memory layer.
    pub fn apply(&mut self, turn: &Turn) {
        self.working.push_back(turn.clone());
        while self.working.len() > self.working_window {
            self.working.pop_front();
        }

        self.short_term.push_back(TurnSummary {
            turn_id: turn.turn_id.clone(),
            sequence: turn.sequence,
            question_type: turn.question_type,
            entities: turn.entities_covered.clone(),
        });
        while self.short_term.len() > self.short_term_window {
            self.short_term.pop_front();
        }

        let mut seen = BTreeSet::new();
        for entity in &turn.entities_covered {
            if !seen.insert(entity) {
                continue;
            }
            let entry = self.entry(entity, turn);
            entry.mention_count += 1;
            entry.last_turn_id = turn.turn_id.clone();
        }

        if turn.question_type == QuestionType::DrillDown {
            for entity in &turn.focus_entities {
                self.entry(entity, turn).depth_level += 1;
            }
        }

        if let Some(embedding) = &turn.answer_embedding {
            self.prior_embeddings.push(embedding.clone());
        }

        self.turn_count += 1;
        self.next_sequence = self.next_sequence.max(turn.sequence.saturating_add(1));
    }

    fn entry(&mut self, entity: &EntityId, turn: &Turn) -> &mut CoverageEntry {
        self.ledger
            .entry(entity.clone())
            .or_insert_with(|| CoverageEntry {
                first_seen_turn: turn.turn_id.clone(),
                first_seen_sequence: turn.sequence,
                mention_count: 0,
                last_turn_id: turn.turn_id.clone(),
                depth_level: 0,
            })
    }

    pub fn is_empty(&self) -> bool {
        self.turn_count == 0
    }

    pub fn turn_count(&self) -> usize {
        self.turn_count
    }

    /// Sequence number for the next turn.
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Working memory, oldest first.
    pub fn working(&self) -> impl Iterator<Item = &Turn> {
        self.working.iter()
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.working.back()
    }

    /// Short-term memory, oldest first.
    pub fn short_term(&self) -> impl Iterator<Item = &TurnSummary> {
        self.short_term.iter()
    }

    pub fn ledger(&self) -> &BTreeMap<EntityId, CoverageEntry> {
        &self.ledger
    }

    pub fn coverage(&self, entity: &EntityId) -> Option<&CoverageEntry> {
        self.ledger.get(entity)
    }

    pub fn mention_count(&self, entity: &EntityId) -> u32 {
        self.ledger.get(entity).map_or(0, |e| e.mention_count)
    }

    pub fn depth_level(&self, entity: &EntityId) -> u32 {
        self.ledger.get(entity).map_or(0, |e| e.depth_level)
    }

    pub fn working_entities(&self) -> BTreeSet<EntityId> {
        self.working
            .iter()
            .flat_map(|t| t.entities_covered.iter().cloned())
            .collect()
    }

    pub fn short_term_entities(&self) -> BTreeSet<EntityId> {
        self.short_term
            .iter()
            .flat_map(|s| s.entities.iter().cloned())
            .collect()
    }

    /// Every entity any answer in the conversation has referenced.
    pub fn covered_entities(&self) -> BTreeSet<EntityId> {
        self.ledger
            .iter()
            .filter(|(_, e)| e.mention_count > 0)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Entities tied for the highest mention count. Empty before any mention.
    pub fn most_mentioned(&self) -> BTreeSet<EntityId> {
        let max = self.ledger.values().map(|e| e.mention_count).max().unwrap_or(0);
        if max == 0 {
            return BTreeSet::new();
        }
        self.ledger
            .iter()
            .filter(|(_, e)| e.mention_count == max)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Entities mentioned at least `threshold` times.
    pub fn saturated(&self, threshold: u32) -> BTreeSet<EntityId> {
        self.ledger
            .iter()
            .filter(|(_, e)| threshold > 0 && e.mention_count >= threshold)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// The attribute filter of the most recent turn.
    pub fn last_filter(&self) -> Option<&AttributeFilter> {
        self.last_turn().map(|t| &t.attribute_filter)
    }

    /// Answer embeddings of every prior turn that has one.
    pub fn prior_answer_embeddings(&self) -> &[Vec<f32>] {
        &self.prior_embeddings
    }

    /// Working memory rendered verbatim for a prompt.
    pub fn render_working(&self) -> String {
        self.working
            .iter()
            .map(|t| format!("User: {}\nAssistant: {}", t.raw_query, t.answer_text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Checks the layer containment invariant:
    /// long-term ⊇ short-term ⊇ working, with both windows within bounds.
    pub fn layers_consistent(&self) -> bool {
        let long_term = self.covered_entities();
        let short_term = self.short_term_entities();
        self.working.len() <= self.working_window
            && self.short_term.len() <= self.short_term_window
            && short_term.is_subset(&long_term)
            && self.working_entities().is_subset(&short_term)
    }
}

//! Conversation Manager — classify the turn, rewrite the query, compute entity filters.
//!
//! Classification is recomputed from scratch for every turn from the raw
//! query and the projected [`ConversationState`]; nothing about the previous
//! classification is stored. Rewriting is template substitution only.

use greenlight_config::ConversationConfig;
use greenlight_core::entity::{AttributeFilter, EntityId};
use greenlight_core::turn::{PlannedQuery, QuestionType, ResponseStrategy};
use std::collections::BTreeSet;
use tracing::debug;

use crate::directory::EntityDirectory;
use crate::state::ConversationState;

const COMPARE_WORDS: &[&str] = &[
    "compare",
    "compared",
    "comparing",
    "comparison",
    "versus",
    "vs",
    "difference",
    "differences",
    "differ",
    "contrast",
];
const COMPARE_PHRASES: &[&str] = &["stack up", "side by side", "better than"];

const EXPLORE_WORDS: &[&str] = &[
    "other",
    "others",
    "else",
    "alternative",
    "alternatives",
    "another",
    "besides",
    "instead",
];
const EXPLORE_PHRASES: &[&str] = &["more options", "any more", "anyone new"];

const DRILL_WORDS: &[&str] = &[
    "more",
    "detail",
    "details",
    "detailed",
    "deeper",
    "elaborate",
    "expand",
    "specifically",
    "further",
    "background",
];

const PRONOUNS: &[&str] = &["he", "she", "they", "him", "her", "them"];
const POSSESSIVES: &[&str] = &["his", "their", "hers", "theirs"];
/// Words after "her" that keep it an object pronoun ("ask her about ...").
const OBJECT_FOLLOWERS: &[&str] = &[
    "about", "again", "and", "as", "at", "before", "by", "directly", "for", "from", "if", "in",
    "instead", "now", "on", "or", "out", "since", "than", "that", "to", "today", "up", "what",
    "when", "whether", "which", "who", "with", "yesterday",
];

/// The classifier's decision plus the entities it is about.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Classification {
    Initial,
    DrillDown(EntityId),
    ExploreMore,
    Compare(Vec<EntityId>),
}

pub struct ConversationPlanner {
    saturation_mentions: u32,
}

impl ConversationPlanner {
    pub fn new(config: &ConversationConfig) -> Self {
        Self {
            saturation_mentions: config.saturation_mentions,
        }
    }

    pub fn plan(
        &self,
        query: &str,
        state: &ConversationState,
        directory: &EntityDirectory,
    ) -> PlannedQuery {
        let mentioned = directory.find_mentions(query);
        let extracted = directory.extract_filter(query);
        let classification = classify(query, &mentioned, state);

        let (question_type, include, exclude, filter, target_depth) = match &classification {
            Classification::Compare(entities) => {
                let include: BTreeSet<EntityId> = entities.iter().cloned().collect();
                let exclude = state
                    .covered_entities()
                    .difference(&include)
                    .cloned()
                    .collect();
                let filter = AttributeFilter {
                    entities: include.clone(),
                    ..extracted.clone()
                };
                (QuestionType::Compare, include, exclude, filter, 0)
            }
            Classification::DrillDown(target) => {
                let include = BTreeSet::from([target.clone()]);
                let filter = AttributeFilter {
                    entities: include.clone(),
                    ..inherit_attributes(&extracted, state)
                };
                let depth = state.depth_level(target) + 1;
                (QuestionType::DrillDown, include, BTreeSet::new(), filter, depth)
            }
            Classification::ExploreMore => {
                let mut exclude = state.most_mentioned();
                exclude.extend(state.saturated(self.saturation_mentions));
                exclude.extend(mentioned.iter().cloned());
                let filter = AttributeFilter {
                    entities: BTreeSet::new(),
                    ..inherit_attributes(&extracted, state)
                };
                (QuestionType::ExploreMore, BTreeSet::new(), exclude, filter, 0)
            }
            Classification::Initial => {
                let mut exclude = state.most_mentioned();
                exclude.extend(state.saturated(self.saturation_mentions));
                for named in &mentioned {
                    exclude.remove(named);
                }
                (QuestionType::Initial, BTreeSet::new(), exclude, extracted.clone(), 0)
            }
        };

        let rewritten_query = rewrite(query, &classification, &mentioned, &exclude, &filter, state, directory);

        debug!(
            question_type = %question_type,
            include = include.len(),
            exclude = exclude.len(),
            target_depth,
            "Planned turn"
        );

        PlannedQuery {
            raw_query: query.to_string(),
            rewritten_query,
            question_type,
            response_strategy: ResponseStrategy::from(question_type),
            filter,
            include,
            exclude,
            target_depth,
            mentioned,
        }
    }
}

fn classify(query: &str, mentioned: &[EntityId], state: &ConversationState) -> Classification {
    let lower = query.to_lowercase();
    let words: Vec<String> = words(&lower).map(str::to_string).collect();
    let has_word = |set: &[&str]| words.iter().any(|w| set.contains(&w.as_str()));
    let has_phrase = |set: &[&str]| set.iter().any(|p| lower.contains(p));

    if mentioned.len() >= 2 {
        return Classification::Compare(mentioned.to_vec());
    }

    let last_primary = state.last_turn().and_then(|t| t.primary_entity()).cloned();

    if has_word(COMPARE_WORDS) || has_phrase(COMPARE_PHRASES) {
        match mentioned.first() {
            Some(named) => {
                if let Some(other) = last_primary.as_ref().filter(|p| *p != named) {
                    return Classification::Compare(vec![named.clone(), other.clone()]);
                }
            }
            None => {
                if let Some(last) = state.last_turn() {
                    let mut pair: Vec<EntityId> = Vec::new();
                    for e in &last.entities_covered {
                        if !pair.contains(e) {
                            pair.push(e.clone());
                        }
                    }
                    if pair.len() >= 2 {
                        pair.truncate(2);
                        return Classification::Compare(pair);
                    }
                }
            }
        }
    }

    if state.is_empty() {
        return Classification::Initial;
    }

    if has_word(EXPLORE_WORDS) || has_phrase(EXPLORE_PHRASES) {
        return Classification::ExploreMore;
    }

    if let Some(named) = mentioned.first() {
        return if state.working_entities().contains(named) {
            Classification::DrillDown(named.clone())
        } else {
            Classification::Initial
        };
    }

    let refers_back = has_word(DRILL_WORDS) || has_word(PRONOUNS) || has_word(POSSESSIVES);
    match last_primary {
        Some(primary) if refers_back => Classification::DrillDown(primary),
        _ => Classification::Initial,
    }
}

/// Follow-ups that name no attribute keep the previous turn's scope.
fn inherit_attributes(extracted: &AttributeFilter, state: &ConversationState) -> AttributeFilter {
    if extracted.has_attributes() {
        return extracted.clone();
    }
    match state.last_filter() {
        Some(previous) => AttributeFilter {
            region: previous.region.clone(),
            format: previous.format.clone(),
            genre: previous.genre.clone(),
            entities: extracted.entities.clone(),
        },
        None => extracted.clone(),
    }
}

fn rewrite(
    query: &str,
    classification: &Classification,
    mentioned: &[EntityId],
    exclude: &BTreeSet<EntityId>,
    filter: &AttributeFilter,
    state: &ConversationState,
    directory: &EntityDirectory,
) -> String {
    let trimmed = query.trim();
    let (base, terminal) = split_terminal(trimmed);

    match classification {
        Classification::Initial => trimmed.to_string(),
        Classification::DrillDown(target) => {
            if mentioned.contains(target) {
                return trimmed.to_string();
            }
            let name = directory.display(target);
            substitute_pronouns(trimmed, &name)
                .unwrap_or_else(|| format!("{base} about {name}{terminal}"))
        }
        Classification::ExploreMore => {
            if exclude.is_empty() {
                return trimmed.to_string();
            }
            let mut ordered: Vec<&EntityId> = exclude.iter().collect();
            ordered.sort_by_key(|e| state.coverage(e).map_or(u32::MAX, |c| c.first_seen_sequence));
            let names: Vec<String> = ordered.into_iter().map(|e| directory.display(e)).collect();
            format!("{base} besides {}{}{terminal}", join_names(&names), describe_scope(filter))
        }
        Classification::Compare(entities) => {
            if entities.iter().all(|e| mentioned.contains(e)) {
                return trimmed.to_string();
            }
            let names: Vec<String> = entities.iter().map(|e| directory.display(e)).collect();
            format!("Compare {}: {trimmed}", join_names(&names))
        }
    }
}

fn split_terminal(text: &str) -> (&str, &str) {
    match text.char_indices().last() {
        Some((i, c)) if matches!(c, '?' | '.' | '!') => (text[..i].trim_end(), &text[i..]),
        _ => (text, ""),
    }
}

fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

fn describe_scope(filter: &AttributeFilter) -> String {
    let parts: Vec<String> = [
        filter.genre.as_deref(),
        filter.format.as_deref(),
        filter.region.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::to_string)
    .collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

/// Replace third-person pronouns with `name`. `None` when nothing was replaced.
fn substitute_pronouns(text: &str, name: &str) -> Option<String> {
    let pieces = pieces(text);
    let mut out = String::with_capacity(text.len() + name.len());
    let mut replaced = false;

    for (i, &(piece, is_word)) in pieces.iter().enumerate() {
        let lower = piece.to_lowercase();
        let possessive = POSSESSIVES.contains(&lower.as_str())
            || (lower == "her" && precedes_noun(&pieces, i));
        if is_word && possessive {
            out.push_str(name);
            out.push_str("'s");
            replaced = true;
        } else if is_word && PRONOUNS.contains(&lower.as_str()) {
            out.push_str(name);
            replaced = true;
        } else {
            out.push_str(piece);
        }
    }
    replaced.then_some(out)
}

/// True when the word at `i` is followed, across plain whitespace, by a
/// word that is not a preposition or conjunction.
fn precedes_noun(pieces: &[(&str, bool)], i: usize) -> bool {
    match (pieces.get(i + 1), pieces.get(i + 2)) {
        (Some((gap, false)), Some((next, true))) if gap.chars().all(char::is_whitespace) => {
            !OBJECT_FOLLOWERS.contains(&next.to_lowercase().as_str())
        }
        _ => false,
    }
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    pieces(text).into_iter().filter(|(_, w)| *w).map(|(p, _)| p)
}

/// Split text into alternating word / non-word runs.
fn pieces(text: &str) -> Vec<(&str, bool)> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut current: Option<bool> = None;

    for (i, ch) in text.char_indices() {
        let is_word = ch.is_alphanumeric() || ch == '\'';
        match current {
            Some(w) if w != is_word => {
                out.push((&text[start..i], w));
                start = i;
                current = Some(is_word);
            }
            None => current = Some(is_word),
            _ => {}
        }
    }
    if let Some(w) = current {
        out.push((&text[start..], w));
    }
    out
}

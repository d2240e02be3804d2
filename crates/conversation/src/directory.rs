//! Entity directory — recognizes entity names and attribute values in text.
//!
//! Built once from the entity store's catalog. Matching is case-insensitive
//! and whole-word; when one match lies inside a longer one ("Nordic Films"
//! within "Nordic Films Group") only the longer match counts.

use greenlight_core::entity::{AttributeFilter, EntityCatalog, EntityId};
use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

struct Matcher<T> {
    value: T,
    pattern: Regex,
}

/// A compiled lexicon over a catalog.
pub struct EntityDirectory {
    entities: Vec<Matcher<EntityId>>,
    names: HashMap<EntityId, String>,
    regions: Vec<Matcher<String>>,
    formats: Vec<Matcher<String>>,
    genres: Vec<Matcher<String>>,
}

impl EntityDirectory {
    pub fn new(catalog: &EntityCatalog) -> Self {
        let mut entities = Vec::with_capacity(catalog.names.len());
        let mut names = HashMap::with_capacity(catalog.names.len());

        for entry in &catalog.names {
            names.insert(entry.id.clone(), entry.name.clone());
            let terms: Vec<&str> = std::iter::once(entry.name.as_str())
                .chain(entry.aliases.iter().map(String::as_str))
                .collect();
            if let Some(pattern) = compile(&terms) {
                entities.push(Matcher {
                    value: entry.id.clone(),
                    pattern,
                });
            }
        }

        Self {
            entities,
            names,
            regions: vocabulary(&catalog.regions),
            formats: vocabulary(&catalog.formats),
            genres: vocabulary(&catalog.genres),
        }
    }

    /// An empty directory recognizes nothing.
    pub fn empty() -> Self {
        Self::new(&EntityCatalog::default())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Display name of an entity, if known.
    pub fn name_of(&self, id: &EntityId) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    /// Display name, falling back to the raw id.
    pub fn display(&self, id: &EntityId) -> String {
        self.name_of(id).map_or_else(|| id.to_string(), str::to_string)
    }

    /// Entities named in `text`, unique, in order of first appearance.
    pub fn find_mentions(&self, text: &str) -> Vec<EntityId> {
        let mut spans: Vec<(usize, usize, &EntityId)> = Vec::new();
        for matcher in &self.entities {
            for caps in matcher.pattern.captures_iter(text) {
                if let Some(m) = caps.get(1) {
                    spans.push((m.start(), m.end(), &matcher.value));
                }
            }
        }

        // Drop spans strictly inside a longer span.
        let nested: Vec<bool> = spans
            .iter()
            .map(|&(start, end, _)| {
                spans
                    .iter()
                    .any(|&(s, e, _)| s <= start && end <= e && (e - s) > (end - start))
            })
            .collect();

        let mut kept: Vec<(usize, &EntityId)> = spans
            .iter()
            .zip(nested)
            .filter(|(_, inside)| !inside)
            .map(|(&(start, _, id), _)| (start, id))
            .collect();
        kept.sort_by_key(|(start, _)| *start);

        let mut mentions: Vec<EntityId> = Vec::new();
        for (_, id) in kept {
            if !mentions.contains(id) {
                mentions.push(id.clone());
            }
        }
        mentions
    }

    /// Attribute constraints and named entities found in a query.
    pub fn extract_filter(&self, text: &str) -> AttributeFilter {
        AttributeFilter {
            region: first_match(&self.regions, text),
            format: first_match(&self.formats, text),
            genre: first_match(&self.genres, text),
            entities: self.find_mentions(text).into_iter().collect(),
        }
    }
}

/// Earliest-occurring vocabulary term in `text`.
fn first_match(matchers: &[Matcher<String>], text: &str) -> Option<String> {
    matchers
        .iter()
        .filter_map(|m| {
            m.pattern
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|hit| (hit.start(), std::cmp::Reverse(hit.len()), &m.value))
        })
        .min()
        .map(|(_, _, value)| value.clone())
}

fn vocabulary<'a>(terms: impl IntoIterator<Item = &'a String>) -> Vec<Matcher<String>> {
    terms
        .into_iter()
        .filter_map(|term| {
            compile(&[term.as_str()]).map(|pattern| Matcher {
                value: term.clone(),
                pattern,
            })
        })
        .collect()
}

/// Case-insensitive whole-word alternation; the term itself is capture group 1.
fn compile(terms: &[&str]) -> Option<Regex> {
    let mut escaped: Vec<String> = terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(regex::escape)
        .collect();
    if escaped.is_empty() {
        return None;
    }
    // Longest alternative first so "Maja Lind" wins over "Maja".
    escaped.sort_by_key(|t| std::cmp::Reverse(t.len()));

    let pattern = format!(
        r"(?i)(?:^|[^\p{{L}}\p{{N}}_])({})(?:$|[^\p{{L}}\p{{N}}_])",
        escaped.join("|")
    );
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(terms = ?terms, error = %e, "Skipping unmatchable catalog term");
            None
        }
    }
}

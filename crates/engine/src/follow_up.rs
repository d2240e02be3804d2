//! Follow-up suggestions.
//!
//! Deterministic templates keyed on the response strategy. Suggestions never
//! drill into an entity the current plan excluded.

use greenlight_conversation::EntityDirectory;
use greenlight_core::entity::EntityId;
use greenlight_core::turn::{PlannedQuery, ResponseStrategy};

pub fn suggest_follow_ups(
    plan: &PlannedQuery,
    referenced: &[EntityId],
    directory: &EntityDirectory,
    limit: usize,
) -> Vec<String> {
    let candidates: Vec<String> = referenced
        .iter()
        .filter(|id| !plan.is_excluded(id))
        .map(|id| directory.display(id))
        .collect();
    let first = candidates.first();
    let second = candidates.get(1);

    let drill = |name: &String| format!("What's the best way to approach {name}?");
    let deeper = |name: &String| format!("What has {name} greenlit recently?");
    let compare = |a: &String, b: &String| format!("How do {a} and {b} compare?");
    let explore = || {
        match scope(plan) {
            Some(scope) => format!("Who else should I consider for {scope}?"),
            None => "Who else should I consider?".to_string(),
        }
    };

    let mut suggestions: Vec<Option<String>> = match plan.response_strategy {
        ResponseStrategy::StrategicAdvice => vec![
            first.map(drill),
            Some(explore()),
            first.zip(second).map(|(a, b)| compare(a, b)),
        ],
        ResponseStrategy::Depth => vec![
            first.map(deeper),
            first.zip(second).map(|(a, b)| compare(a, b)),
            Some(explore()),
        ],
        ResponseStrategy::Breadth => vec![
            first.map(drill),
            first.zip(second).map(|(a, b)| compare(a, b)),
            Some("Are there any other options I haven't considered?".to_string()),
        ],
        ResponseStrategy::Compare => vec![
            first.map(drill),
            second.map(drill),
            Some(explore()),
        ],
    };

    let mut out: Vec<String> = Vec::with_capacity(limit);
    for suggestion in suggestions.drain(..).flatten() {
        if out.len() == limit {
            break;
        }
        if !out.contains(&suggestion) {
            out.push(suggestion);
        }
    }
    out
}

fn scope(plan: &PlannedQuery) -> Option<String> {
    let filter = &plan.filter;
    let parts: Vec<&str> = [filter.genre.as_deref(), filter.format.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    match (parts.is_empty(), filter.region.as_deref()) {
        (true, None) => None,
        (true, Some(region)) => Some(region.to_string()),
        (false, None) => Some(parts.join(" ")),
        (false, Some(region)) => Some(format!("{} in {region}", parts.join(" "))),
    }
}

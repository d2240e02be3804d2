//! Prompt construction — one prompt shape per [`ResponseStrategy`].
//!
//! The prompt has two parts: a system message carrying the persona and the
//! strategy instructions, and a user message with four sections:
//!
//! 1. **Conversation so far**: working memory, verbatim
//! 2. **Context**: fused retrieval items, best first
//! 3. **Already covered / Avoid**: entities the answer must not lead with
//! 4. **Question**: the rewritten query
//!
//! Assembly is deterministic: identical inputs produce identical prompts.

use greenlight_conversation::{ConversationState, EntityDirectory};
use greenlight_core::entity::EntityId;
use greenlight_core::retrieval::RetrievedItem;
use greenlight_core::turn::{PlannedQuery, ResponseStrategy};

// ── Types ─────────────────────────────────────────────────────────────────

const PERSONA: &str = "You are Greenlight, an advisor who helps producers decide \
who to pitch and how. Answer only from the supplied context. When the context \
does not support a claim, say so instead of guessing. Name people and \
companies explicitly.";

/// Everything needed to build one generation prompt.
pub struct PromptInput<'a> {
    pub plan: &'a PlannedQuery,
    pub context: &'a [RetrievedItem],
    pub state: &'a ConversationState,
    pub directory: &'a EntityDirectory,
    /// Entities a regeneration must steer away from. Empty on the first attempt.
    pub avoid: &'a [EntityId],
}

/// An assembled prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

// ── Assembly ──────────────────────────────────────────────────────────────

pub fn build_prompt(input: &PromptInput<'_>) -> Prompt {
    let plan = input.plan;
    let include = display_all(input.directory, &plan.include);

    let mut system = String::from(PERSONA);
    system.push_str("\n\n");
    system.push_str(&strategy_instructions(plan, &include));

    let mut user = String::new();

    let history = input.state.render_working();
    if !history.is_empty() {
        user.push_str("## Conversation so far\n");
        user.push_str(&history);
        user.push_str("\n\n");
    }

    user.push_str("## Context\n");
    for (i, item) in input.context.iter().enumerate() {
        user.push_str(&format!(
            "{}. [{}] {}: {}\n",
            i + 1,
            item.source,
            item.title,
            item.text
        ));
    }
    user.push('\n');

    let excluded: Vec<&EntityId> = plan
        .exclude
        .iter()
        .filter(|id| !plan.include.contains(*id))
        .collect();
    if !excluded.is_empty() {
        user.push_str("## Already covered\n");
        user.push_str(&format!(
            "Do not lead with these; the user has heard about them: {}\n\n",
            display_all(input.directory, excluded).join(", ")
        ));
    }

    if !input.avoid.is_empty() {
        user.push_str("## Avoid\n");
        user.push_str(&format!(
            "A previous draft repeated earlier answers. Do not restate what was \
             already said about {}. Lead with a different angle, new facts or \
             different people.\n\n",
            display_all(input.directory, input.avoid).join(", ")
        ));
    }

    user.push_str("## Question\n");
    user.push_str(&plan.rewritten_query);

    Prompt { system, user }
}

fn display_all<'a>(
    directory: &EntityDirectory,
    ids: impl IntoIterator<Item = &'a EntityId>,
) -> Vec<String> {
    ids.into_iter().map(|id| directory.display(id)).collect()
}

fn strategy_instructions(plan: &PlannedQuery, include: &[String]) -> String {
    match plan.response_strategy {
        ResponseStrategy::StrategicAdvice => "Give one clear primary recommendation \
            first, explain why it fits, then list concrete next steps."
            .to_string(),
        ResponseStrategy::Depth => {
            let subject = if include.is_empty() {
                "the entity the user is asking about".to_string()
            } else {
                include.join(", ")
            };
            format!(
                "Go deeper on {subject}. This is detail level {}: add specifics \
                 earlier answers did not cover, such as track record, current \
                 priorities, decision process and how to approach them.",
                plan.target_depth.max(1)
            )
        }
        ResponseStrategy::Breadth => "Suggest alternatives the user has not heard \
            about yet. Cover several adjacent options briefly and say what \
            distinguishes each one."
            .to_string(),
        ResponseStrategy::Compare => {
            let subjects = if include.is_empty() {
                "the entities the user named".to_string()
            } else {
                include.join(" and ")
            };
            format!(
                "Compare {subjects}. Mention every one of them by name and \
                 structure the answer as a side-by-side comparison: focus, \
                 recent work, fit for this project, and a recommendation."
            )
        }
    }
}

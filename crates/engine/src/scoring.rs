//! Answer quality and repetition scoring.
//!
//! Five independent dimensions, each in [0, 1], averaged with equal weights.
//! All scoring is pure computation over the answer text and prior embeddings.

use greenlight_retrieval::max_similarity;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::LazyLock;

static NUMBER_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b\d[\d.,]*%?").ok());

static ACTION_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(contact|reach out|pitch|send|schedule|prepare|ask|follow up|email|introduce|approach|target|start with|focus on|next step|lead with|book)\b",
    )
    .ok()
});

static REASONING_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(because|since|therefore|so that|which means|given that|as a result|however|whereas|in order to|this means|that is why)\b",
    )
    .ok()
});

static WORD_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").ok());

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "been", "being", "could", "does", "from", "have", "into", "just",
    "more", "most", "only", "other", "over", "should", "some", "than", "that", "their", "them",
    "then", "there", "these", "they", "this", "those", "what", "when", "where", "which", "while",
    "who", "whom", "will", "with", "would", "your",
];

/// Per-dimension quality of one answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityScores {
    /// Named entities and figures.
    pub specificity: f32,
    /// Imperative / next-step language.
    pub actionability: f32,
    /// Reasoning connectives.
    pub strategic_value: f32,
    /// Lexical overlap with working memory.
    pub context_awareness: f32,
    /// 1 − repetition; 0 when repetition is unmeasured.
    pub novelty: f32,
}

impl QualityScores {
    /// Arithmetic mean of the five dimensions.
    pub fn overall(&self) -> f32 {
        (self.specificity
            + self.actionability
            + self.strategic_value
            + self.context_awareness
            + self.novelty)
            / 5.0
    }
}

/// Inputs for scoring one answer.
pub struct ScoreInput<'a> {
    pub answer: &'a str,
    /// Number of distinct entities the answer names.
    pub entity_count: usize,
    /// Working-memory text (prior queries and answers). Empty on a first turn.
    pub working_text: &'a str,
    /// `None` when the answer could not be embedded. Novelty then scores 0:
    /// an unmeasured answer is never credited as new.
    pub repetition: Option<f32>,
}

pub fn score_answer(input: &ScoreInput<'_>) -> QualityScores {
    QualityScores {
        specificity: specificity(input.answer, input.entity_count),
        actionability: saturating(distinct_matches(&ACTION_RE, input.answer), 3),
        strategic_value: saturating(distinct_matches(&REASONING_RE, input.answer), 3),
        context_awareness: context_awareness(input.answer, input.working_text),
        novelty: input
            .repetition
            .map_or(0.0, |repetition| (1.0 - repetition).clamp(0.0, 1.0)),
    }
}

/// Maximum cosine similarity between an answer and any prior answer.
///
/// 0.0 when there are no prior answers. Negative similarities clamp to 0.
pub fn repetition_score(answer_embedding: &[f32], prior: &[Vec<f32>]) -> f32 {
    max_similarity(answer_embedding, prior.iter().map(Vec::as_slice)).clamp(0.0, 1.0)
}

fn specificity(answer: &str, entity_count: usize) -> f32 {
    let numbers = count_matches(&NUMBER_RE, answer);
    0.7 * saturating(entity_count, 2) + 0.3 * saturating(numbers, 3)
}

fn context_awareness(answer: &str, working_text: &str) -> f32 {
    let context = content_words(working_text);
    if context.is_empty() {
        // nothing to be aware of yet
        return 0.5;
    }
    let answer_words = content_words(answer);
    let shared = answer_words.intersection(&context).count();
    saturating(shared, context.len().min(10))
}

fn content_words(text: &str) -> HashSet<String> {
    let Some(re) = WORD_RE.as_ref() else {
        return HashSet::new();
    };
    re.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.chars().count() > 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn count_matches(re: &LazyLock<Option<Regex>>, text: &str) -> usize {
    re.as_ref().map_or(0, |re| re.find_iter(text).count())
}

fn distinct_matches(re: &LazyLock<Option<Regex>>, text: &str) -> usize {
    re.as_ref().map_or(0, |re| {
        re.find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect::<HashSet<_>>()
            .len()
    })
}

fn saturating(count: usize, cap: usize) -> f32 {
    if cap == 0 {
        return 0.0;
    }
    count.min(cap) as f32 / cap as f32
}

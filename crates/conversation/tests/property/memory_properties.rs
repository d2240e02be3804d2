use chrono::Utc;
use greenlight_config::ConversationConfig;
use greenlight_core::entity::EntityId;
use greenlight_core::turn::{ConversationId, QuestionType, ResponseStrategy, Turn};
use greenlight_conversation::ConversationState;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn question_type() -> impl Strategy<Value = QuestionType> {
    prop_oneof![
        Just(QuestionType::Initial),
        Just(QuestionType::DrillDown),
        Just(QuestionType::ExploreMore),
        Just(QuestionType::Compare),
    ]
}

fn turns() -> impl Strategy<Value = Vec<Turn>> {
    prop::collection::vec(
        (question_type(), prop::collection::vec(0..8u8, 0..4)),
        0..20,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (qt, entities))| {
                let entities: Vec<EntityId> =
                    entities.iter().map(|e| EntityId::new(format!("e{e}"))).collect();
                Turn {
                    turn_id: format!("t{i}"),
                    conversation_id: ConversationId::from("c"),
                    user_id: "u".into(),
                    sequence: i as u32,
                    raw_query: format!("q{i}"),
                    rewritten_query: format!("q{i}"),
                    question_type: qt,
                    response_strategy: ResponseStrategy::from(qt),
                    attribute_filter: Default::default(),
                    focus_entities: entities.iter().take(1).cloned().collect(),
                    answer_text: format!("a{i}"),
                    answer_embedding: None,
                    entities_covered: entities,
                    quality_score: 0.5,
                    repetition_score: 0.0,
                    regenerations: 0,
                    flagged_repetitive: false,
                    degraded_sources: vec![],
                    created_at: Utc::now(),
                }
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn memory_layers_stay_nested_and_bounded(log in turns()) {
        let config = ConversationConfig::default();
        let mut state = ConversationState::new(&config);
        for turn in &log {
            state.apply(turn);
            prop_assert!(state.working().count() <= config.working_window);
            prop_assert!(state.short_term().count() <= config.short_term_window);
            prop_assert!(state.layers_consistent());
        }
    }

    #[test]
    fn depth_never_decreases(log in turns()) {
        let config = ConversationConfig::default();
        let mut state = ConversationState::new(&config);
        let ids: BTreeSet<EntityId> = (0..8u8).map(|e| EntityId::new(format!("e{e}"))).collect();
        let mut previous: Vec<u32> = ids.iter().map(|id| state.depth_level(id)).collect();

        for turn in &log {
            state.apply(turn);
            let current: Vec<u32> = ids.iter().map(|id| state.depth_level(id)).collect();
            for (before, after) in previous.iter().zip(&current) {
                prop_assert!(after >= before);
            }
            previous = current;
        }
    }

    #[test]
    fn projection_matches_incremental_application(log in turns()) {
        let config = ConversationConfig::default();
        let projected = ConversationState::project(&log, &config);
        let mut incremental = ConversationState::new(&config);
        for turn in &log {
            incremental.apply(turn);
        }
        prop_assert_eq!(projected.ledger(), incremental.ledger());
        prop_assert_eq!(projected.turn_count(), log.len());
    }
}

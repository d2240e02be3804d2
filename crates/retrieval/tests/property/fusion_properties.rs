use greenlight_config::FusionConfig;
use greenlight_core::entity::EntityId;
use greenlight_core::retrieval::{RetrievalSource, RetrievedItem};
use greenlight_retrieval::FusionEngine;
use proptest::prelude::*;
use std::collections::HashSet;

const EMBEDDINGS: [[f32; 3]; 4] = [
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.98, 0.1, 0.0],
    [0.0, 0.0, 1.0],
];

fn items() -> impl Strategy<Value = Vec<RetrievedItem>> {
    prop::collection::vec(
        (0..6usize, 0.0f32..1.0, prop::option::of(0..EMBEDDINGS.len())),
        0..12,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (title, score, emb))| RetrievedItem {
                id: format!("item-{i}"),
                source: RetrievalSource::Similarity,
                title: format!("Title {title}"),
                text: format!("Passage {i}"),
                score,
                entity_refs: vec![EntityId::new(format!("e{title}"))],
                embedding: emb.map(|e| EMBEDDINGS[e].to_vec()),
                metadata: serde_json::Map::new(),
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn fusing_a_set_with_itself_equals_fusing_it_once(x in items(), budget in 1usize..10) {
        let engine = FusionEngine::new(&FusionConfig::default());
        prop_assert_eq!(engine.fuse(&x, &x, budget), engine.fuse(&x, &[], budget));
    }

    #[test]
    fn output_respects_budget_and_unique_titles(
        s in items(),
        v in items(),
        budget in 0usize..10,
    ) {
        let engine = FusionEngine::new(&FusionConfig::default());
        let fused = engine.fuse(&s, &v, budget);
        prop_assert!(fused.len() <= budget);

        let titles: HashSet<String> = fused.iter().map(|i| i.title.to_lowercase()).collect();
        prop_assert_eq!(titles.len(), fused.len());
    }

    #[test]
    fn output_is_sourced_from_input(s in items(), v in items()) {
        let engine = FusionEngine::new(&FusionConfig::default());
        for item in engine.fuse(&s, &v, 20) {
            let pool = match item.source {
                RetrievalSource::Structured => &s,
                RetrievalSource::Similarity => &v,
            };
            prop_assert!(pool.iter().any(|p| p.id == item.id && p.title == item.title));
        }
    }

    #[test]
    fn empty_inputs_fuse_to_nothing(budget in 0usize..10) {
        let engine = FusionEngine::new(&FusionConfig::default());
        prop_assert!(engine.fuse(&[], &[], budget).is_empty());
    }
}

//! In-memory turn log for tests and ephemeral sessions.

use async_trait::async_trait;
use greenlight_core::error::StoreError;
use greenlight_core::turn::{ConversationId, Turn, TurnStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// An append-only turn log held in a `HashMap` of per-conversation vectors.
pub struct InMemoryTurnStore {
    conversations: Arc<RwLock<HashMap<ConversationId, Vec<Turn>>>>,
}

impl InMemoryTurnStore {
    pub fn new() -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryTurnStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TurnStore for InMemoryTurnStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(&self, turn: &Turn) -> Result<(), StoreError> {
        let mut conversations = self.conversations.write().await;
        let log = conversations.entry(turn.conversation_id.clone()).or_default();

        if log.iter().any(|t| t.sequence == turn.sequence || t.turn_id == turn.turn_id) {
            return Err(StoreError::Storage(format!(
                "turn {} (sequence {}) already recorded for conversation {}",
                turn.turn_id, turn.sequence, turn.conversation_id
            )));
        }

        let position = log.partition_point(|t| t.sequence < turn.sequence);
        log.insert(position, turn.clone());
        debug!(
            conversation_id = %turn.conversation_id,
            sequence = turn.sequence,
            "Appended turn"
        );
        Ok(())
    }

    async fn turns(&self, conversation_id: &ConversationId) -> Result<Vec<Turn>, StoreError> {
        Ok(self
            .conversations
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn count(&self, conversation_id: &ConversationId) -> Result<usize, StoreError> {
        Ok(self
            .conversations
            .read()
            .await
            .get(conversation_id)
            .map_or(0, Vec::len))
    }
}

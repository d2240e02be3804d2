//! Domain event system — fire-and-forget notifications for downstream consumers.
//!
//! Demand analytics subscribe to `EntitiesReferenced`; operators watch
//! `SourceDegraded`. Publishing never blocks and never fails a turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::entity::EntityId;
use crate::retrieval::RetrievalSource;
use crate::turn::QuestionType;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// An answered turn referenced these entities
    EntitiesReferenced {
        conversation_id: String,
        turn_id: String,
        entities: Vec<EntityId>,
        timestamp: DateTime<Utc>,
    },

    /// A retriever failed and the turn ran in degraded mode
    SourceDegraded {
        conversation_id: String,
        source: RetrievalSource,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A turn was answered and persisted
    TurnCompleted {
        conversation_id: String,
        turn_id: String,
        question_type: QuestionType,
        quality_score: f32,
        repetition_score: f32,
        regenerations: u32,
        timestamp: DateTime<Utc>,
    },

    /// A turn failed and nothing was persisted
    TurnFailed {
        conversation_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow subscribers
/// lag and drop events; publishers are never slowed down.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

//! # Greenlight Core
//!
//! Domain types, traits, and error definitions for the Greenlight
//! conversational retrieval engine. This crate defines the domain model that
//! every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here: the relationship store
//! ([`EntityStore`]), the vector index ([`VectorIndex`]), the turn log
//! ([`TurnStore`]) and the two opaque capabilities ([`Generator`],
//! [`Embedder`]). Implementations live in their respective crates, so tests
//! can swap in scripted stand-ins without a network.

pub mod entity;
pub mod error;
pub mod event;
pub mod provider;
pub mod retrieval;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use entity::{
    AttributeFilter, Entity, EntityAttributes, EntityCatalog, EntityId, EntityKind, EntityName,
    EntityStore, Relationship,
};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use provider::{Embedder, GenerationRequest, GenerationResponse, Generator, Usage};
pub use retrieval::{RetrievalSource, RetrievedItem, VectorIndex};
pub use turn::{
    ConversationId, PlannedQuery, QuestionType, ResponseStrategy, Turn, TurnOutcome, TurnStore,
    TurnWarning,
};

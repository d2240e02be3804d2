//! Conversation memory for Greenlight.
//!
//! The turn log ([`TurnStore`](greenlight_core::TurnStore)) is the source of
//! truth. [`ConversationState`] is a pure projection over it, and
//! [`ConversationPlanner`] turns a raw query plus that projection into a
//! [`PlannedQuery`](greenlight_core::PlannedQuery).

pub mod directory;
pub mod planner;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod state;
pub mod store;

pub use directory::EntityDirectory;
pub use planner::ConversationPlanner;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteTurnStore;
pub use state::{ConversationState, CoverageEntry, TurnSummary};
pub use store::InMemoryTurnStore;

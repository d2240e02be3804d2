//! Capability adapters for Greenlight.
//!
//! All backends implement `greenlight_core::Generator` and/or
//! `greenlight_core::Embedder`. The factory builds them from configuration.

pub mod factory;
pub mod openai_compat;
pub mod retry;

pub use factory::{build_embedder, build_generator};
pub use openai_compat::OpenAiCompatProvider;
pub use retry::RetryingEmbedder;

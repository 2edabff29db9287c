//! Conversational recruiting: the per-message dialogue pipeline.
//!
//! `engine` drives one turn; `extract` and `transitions` are the
//! deterministic parts; `store` and `lock` keep concurrent deliveries for
//! one identity from corrupting each other.

pub mod engine;
pub mod extract;
pub mod handlers;
pub mod lock;
pub mod models;
pub mod prompts;
pub mod store;
pub mod transitions;

pub use engine::{ConversationEngine, EngineReply, EngineSettings};

//! Chatlab Core - conversations and their lifecycle
//!
//! This crate provides:
//! - The conversation and message model, including the open metadata map
//! - The `ConversationStore` interface and an in-memory implementation
//! - The history service that titles, lists and deletes conversations
//! - One-file-per-conversation JSON persistence

pub mod conversation;
pub mod history;
pub mod persistence;
pub mod store;

// Re-export key types for convenience
pub use chatlab_common::ChatOptions;
pub use conversation::{Conversation, Message, Metadata, Role};
pub use history::ConversationHistory;
pub use persistence::{ConversationPersistence, PersistenceService};
pub use store::{ConversationStore, InMemoryConversationStore};

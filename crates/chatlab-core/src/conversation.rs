//! Conversation and message model
//!
//! The serialized field names match the on-disk save format, so changing a
//! `serde` attribute here breaks loading of existing conversations.

use chatlab_common::constants::metadata::TIMESTAMP;
use chatlab_common::{ChatOptions, build_title, generate_conversation_id, is_blank};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Open metadata map attached to every message
pub type Metadata = BTreeMap<String, Value>;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    #[serde(alias = "user")]
    User,
    #[serde(alias = "assistant")]
    Assistant,
    #[serde(alias = "system")]
    System,
    #[serde(alias = "tool")]
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "messageType")]
    pub role: Role,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Empty assistant message that a stream will fill in
    pub fn assistant_placeholder() -> Self {
        Self::assistant("")
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn metadata_i64(&self, key: &str) -> Option<i64> {
        self.metadata.get(key).and_then(Value::as_i64)
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Response (assistant) or submit (user) time; absent while a stream is pending
    pub fn timestamp(&self) -> Option<i64> {
        self.metadata_i64(TIMESTAMP)
    }
}

/// A conversation and its full message history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub conversation_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub create_timestamp: i64,
    pub update_timestamp: i64,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub chat_options: ChatOptions,
    #[serde(rename = "messageList", default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Create an empty, untitled conversation with a fresh prefixed id
    pub fn new(system_prompt: Option<String>, chat_options: ChatOptions, now: i64) -> Self {
        Self {
            conversation_id: generate_conversation_id(),
            title: None,
            create_timestamp: now,
            update_timestamp: now,
            system_prompt,
            chat_options,
            messages: Vec::new(),
        }
    }

    pub fn has_title(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !is_blank(t))
    }

    /// Title derived from the first user message, if there is one
    pub fn derive_title(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| build_title(&m.text))
    }

    /// Move the update timestamp forward; it never goes backwards and never
    /// drops below the create timestamp.
    pub fn touch(&mut self, now: i64) {
        self.update_timestamp = now.max(self.update_timestamp).max(self.create_timestamp);
    }

    /// Stamp trailing messages that have no timestamp yet, stopping at the
    /// first one that already has one.
    pub fn stamp_untimed_tail(&mut self, timestamp: i64) {
        for message in self.messages.iter_mut().rev() {
            if message.metadata.contains_key(TIMESTAMP) {
                break;
            }
            message.set_metadata(TIMESTAMP, timestamp);
        }
    }

    /// Display label used in listings
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(untitled)")
    }
}

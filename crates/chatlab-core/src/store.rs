//! Conversation store interface
//!
//! The store is owned by one component and passed by reference to whoever
//! needs it; nothing reaches it through globals.

use crate::conversation::Conversation;
use async_trait::async_trait;
use chatlab_common::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Keyed access to conversations
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetch a copy of a conversation
    async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>>;

    /// Insert or replace a conversation
    async fn put(&self, conversation: Conversation) -> Result<()>;

    /// Insert only if no conversation with that id exists. Returns true when inserted.
    async fn put_if_absent(&self, conversation: Conversation) -> Result<bool>;

    /// Remove a conversation, returning it if it existed
    async fn remove(&self, conversation_id: &str) -> Result<Option<Conversation>>;

    /// All conversations, in no particular order
    async fn list(&self) -> Result<Vec<Conversation>>;
}

/// Store backed by a map in memory
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().await.get(conversation_id).cloned())
    }

    async fn put(&self, conversation: Conversation) -> Result<()> {
        debug!("Storing conversation {}", conversation.conversation_id);
        self.conversations
            .write()
            .await
            .insert(conversation.conversation_id.clone(), conversation);
        Ok(())
    }

    async fn put_if_absent(&self, conversation: Conversation) -> Result<bool> {
        let mut conversations = self.conversations.write().await;
        if conversations.contains_key(&conversation.conversation_id) {
            return Ok(false);
        }
        conversations.insert(conversation.conversation_id.clone(), conversation);
        Ok(true)
    }

    async fn remove(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversations.write().await.remove(conversation_id))
    }

    async fn list(&self) -> Result<Vec<Conversation>> {
        Ok(self.conversations.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatlab_common::ChatOptions;

    #[tokio::test]
    async fn test_put_get_remove() {
        let store = InMemoryConversationStore::new();
        let conversation = Conversation::new(None, ChatOptions::default(), 1);
        let id = conversation.conversation_id.clone();

        store.put(conversation.clone()).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(conversation));
        assert_eq!(store.list().await.unwrap().len(), 1);

        assert!(store.remove(&id).await.unwrap().is_some());
        assert!(store.get(&id).await.unwrap().is_none());
        assert!(store.remove(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_if_absent_keeps_existing() {
        let store = InMemoryConversationStore::new();
        let mut conversation = Conversation::new(None, ChatOptions::default(), 1);
        let id = conversation.conversation_id.clone();
        assert!(store.put_if_absent(conversation.clone()).await.unwrap());

        conversation.title = Some("changed".to_string());
        assert!(!store.put_if_absent(conversation).await.unwrap());
        assert!(store.get(&id).await.unwrap().unwrap().title.is_none());
    }
}

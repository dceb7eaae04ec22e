//! Conversation history service
//!
//! Owns the conversation store and (optionally) its file persistence. It
//! creates conversations, applies the end-of-exchange bookkeeping (title and
//! update timestamp), and loads/saves everything at startup and shutdown.

use crate::conversation::Conversation;
use crate::persistence::{ConversationPersistence, PersistenceService};
use crate::store::ConversationStore;
use chatlab_common::{ChatOptions, ChatlabError, Clock, Result, is_blank};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct ConversationHistory {
    store: Arc<dyn ConversationStore>,
    persistence: Option<Arc<ConversationPersistence>>,
    clock: Arc<dyn Clock>,
}

impl ConversationHistory {
    pub fn new(store: Arc<dyn ConversationStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            persistence: None,
            clock,
        }
    }

    /// Attach file persistence used by `load_all`, `save_all` and `delete`
    pub fn with_persistence(mut self, persistence: Arc<ConversationPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Create and register a new, empty conversation
    pub async fn create(
        &self,
        system_prompt: Option<String>,
        chat_options: ChatOptions,
    ) -> Result<Conversation> {
        let system_prompt = system_prompt.filter(|p| !is_blank(p));
        let conversation = Conversation::new(system_prompt, chat_options, self.clock.now_millis());
        if !self.store.put_if_absent(conversation.clone()).await? {
            return Err(ChatlabError::Storage(format!(
                "conversation {} already exists",
                conversation.conversation_id
            )));
        }
        info!("Created conversation {}", conversation.conversation_id);
        Ok(conversation)
    }

    pub async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        self.store.get(conversation_id).await
    }

    /// Fetch a conversation that must exist
    pub async fn require(&self, conversation_id: &str) -> Result<Conversation> {
        self.store
            .get(conversation_id)
            .await?
            .ok_or_else(|| ChatlabError::Storage(format!("unknown conversation {conversation_id}")))
    }

    /// Record that an exchange finished: set the title from the first user
    /// message if there is none yet, stamp untimed trailing messages and move
    /// the update timestamp forward.
    pub async fn complete_exchange(&self, conversation_id: &str) -> Result<Conversation> {
        let mut conversation = self.require(conversation_id).await?;
        let now = self.clock.now_millis();

        if !conversation.has_title() {
            conversation.title = conversation.derive_title();
            debug!(
                "Titled conversation {}: {:?}",
                conversation_id, conversation.title
            );
        }
        conversation.stamp_untimed_tail(now);
        conversation.touch(now);

        self.store.put(conversation.clone()).await?;
        Ok(conversation)
    }

    pub async fn rename(&self, conversation_id: &str, title: &str) -> Result<Conversation> {
        let mut conversation = self.require(conversation_id).await?;
        conversation.title = Some(title.trim().to_string()).filter(|t| !t.is_empty());
        conversation.touch(self.clock.now_millis());
        self.store.put(conversation.clone()).await?;
        Ok(conversation)
    }

    /// Conversations that have at least one message, most recently updated first
    pub async fn list(&self) -> Result<Vec<Conversation>> {
        let mut conversations: Vec<_> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|c| !c.messages.is_empty())
            .collect();
        conversations.sort_by(|a, b| {
            b.update_timestamp
                .cmp(&a.update_timestamp)
                .then_with(|| a.conversation_id.cmp(&b.conversation_id))
        });
        Ok(conversations)
    }

    /// Remove a conversation from the store and delete its saved file.
    /// Returns false when the id is unknown.
    pub async fn delete(&self, conversation_id: &str) -> Result<bool> {
        let Some(conversation) = self.store.remove(conversation_id).await? else {
            warn!("Delete requested for unknown conversation {}", conversation_id);
            return Ok(false);
        };
        if let Some(persistence) = &self.persistence {
            persistence.delete(&conversation).await?;
        }
        info!("Deleted conversation {}", conversation_id);
        Ok(true)
    }

    /// Load every saved conversation into the store
    pub async fn load_all(&self) -> Result<usize> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };
        let conversations = persistence.loads().await?;
        let count = conversations.len();
        for conversation in conversations {
            self.store.put(conversation).await?;
        }
        info!("Loaded {} conversations", count);
        Ok(count)
    }

    /// Save every non-empty conversation. A failing file is logged and skipped
    /// so one bad conversation does not stop the rest from being written.
    pub async fn save_all(&self) -> Result<usize> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };
        let mut saved = 0;
        for conversation in self.list().await? {
            match persistence.save(&conversation).await {
                Ok(_) => saved += 1,
                Err(e) => error!(
                    "Failed to save conversation {}: {}",
                    conversation.conversation_id, e
                ),
            }
        }
        info!("Saved {} conversations", saved);
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Message;
    use crate::store::InMemoryConversationStore;
    use chatlab_common::ManualClock;
    use chatlab_common::constants::metadata::TIMESTAMP;

    fn history(clock: Arc<ManualClock>) -> ConversationHistory {
        ConversationHistory::new(Arc::new(InMemoryConversationStore::new()), clock)
    }

    async fn add_exchange(history: &ConversationHistory, id: &str, prompt: &str, answer: &str) {
        let mut conversation = history.require(id).await.unwrap();
        conversation.messages.push(Message::user(prompt));
        conversation.messages.push(Message::assistant(answer));
        history.store().put(conversation).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_drops_blank_system_prompt() {
        let history = history(Arc::new(ManualClock::new(100)));
        let conversation = history
            .create(Some("   ".to_string()), ChatOptions::default())
            .await
            .unwrap();
        assert!(conversation.system_prompt.is_none());
        assert_eq!(conversation.create_timestamp, 100);
        assert!(history.get(&conversation.conversation_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_complete_exchange_titles_once_and_touches() {
        let clock = Arc::new(ManualClock::new(1_000));
        let history = history(clock.clone());
        let id = history
            .create(None, ChatOptions::default())
            .await
            .unwrap()
            .conversation_id;

        add_exchange(&history, &id, "What is the borrow checker for?", "Safety.").await;
        clock.set(2_000);
        let conversation = history.complete_exchange(&id).await.unwrap();
        assert_eq!(conversation.title.as_deref(), Some("What is the borrow c..."));
        assert_eq!(conversation.update_timestamp, 2_000);
        assert!(conversation.messages.iter().all(|m| m.timestamp() == Some(2_000)));

        add_exchange(&history, &id, "Another question", "Another answer").await;
        clock.set(3_000);
        let conversation = history.complete_exchange(&id).await.unwrap();
        assert_eq!(conversation.title.as_deref(), Some("What is the borrow c..."));
        assert_eq!(conversation.update_timestamp, 3_000);
    }

    #[tokio::test]
    async fn test_list_sorted_by_update_desc_and_skips_empty() {
        let clock = Arc::new(ManualClock::new(1_000));
        let history = history(clock.clone());
        let older = history.create(None, ChatOptions::default()).await.unwrap();
        let newer = history.create(None, ChatOptions::default()).await.unwrap();
        history.create(None, ChatOptions::default()).await.unwrap();

        add_exchange(&history, &older.conversation_id, "a", "b").await;
        add_exchange(&history, &newer.conversation_id, "c", "d").await;
        clock.set(2_000);
        history.complete_exchange(&older.conversation_id).await.unwrap();
        clock.set(3_000);
        history.complete_exchange(&newer.conversation_id).await.unwrap();

        let ids: Vec<_> = history
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.conversation_id)
            .collect();
        assert_eq!(ids, vec![newer.conversation_id, older.conversation_id]);
    }

    #[tokio::test]
    async fn test_save_load_and_delete_with_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let persistence = Arc::new(ConversationPersistence::new(dir.path()));
        let history = history(clock.clone()).with_persistence(persistence.clone());

        let id = history
            .create(Some("sys".to_string()), ChatOptions::default())
            .await
            .unwrap()
            .conversation_id;
        add_exchange(&history, &id, "hello", "hi").await;
        history.complete_exchange(&id).await.unwrap();
        assert_eq!(history.save_all().await.unwrap(), 1);

        let reloaded = ConversationHistory::new(Arc::new(InMemoryConversationStore::new()), clock)
            .with_persistence(persistence);
        assert_eq!(reloaded.load_all().await.unwrap(), 1);
        let conversation = reloaded.require(&id).await.unwrap();
        assert_eq!(conversation.messages[0].metadata_i64(TIMESTAMP), Some(1_000));
        assert_eq!(conversation.system_prompt.as_deref(), Some("sys"));

        assert!(reloaded.delete(&id).await.unwrap());
        assert!(!dir.path().join(format!("{id}.json")).exists());
        assert!(!reloaded.delete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_unknown_conversation_fails() {
        let history = history(Arc::new(ManualClock::new(0)));
        assert!(matches!(
            history.rename("Chat-missing", "x").await,
            Err(ChatlabError::Storage(_))
        ));
    }
}

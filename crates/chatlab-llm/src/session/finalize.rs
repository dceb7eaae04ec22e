//! Finalization of a streaming session into message metadata
//!
//! Runs once per session, after natural completion, cancellation or failure.
//! It only mutates the in-memory conversation; saving to disk happens on a
//! separate lifecycle event.

use super::classifier::StreamSession;
use crate::provider::{ResponseMetadata, Usage};
use chatlab_common::Clock;
use chatlab_common::constants::metadata::{
    CHAT_META, CONVERSATION_ID, THINK_PROCESS, THINK_TIMESTAMP, TIMESTAMP, TOOL_PROCESS_MESSAGES,
    TOOL_PROCESS_TIMESTAMP,
};
use chatlab_core::{Conversation, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Usage summary stored on the user message of a completed exchange
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMeta {
    pub model: Option<String>,
    pub usage: Option<Usage>,
    pub retrieved_document_count: usize,
    pub retrieved_document_ids: Vec<String>,
}

impl From<&ResponseMetadata> for ChatMeta {
    fn from(metadata: &ResponseMetadata) -> Self {
        Self {
            model: metadata.model.clone(),
            usage: metadata.usage.clone(),
            retrieved_document_count: metadata.retrieved_documents.len(),
            retrieved_document_ids: metadata
                .retrieved_documents
                .iter()
                .map(|d| d.id.clone())
                .collect(),
        }
    }
}

#[derive(Clone)]
pub struct FinalizationRecorder {
    clock: Arc<dyn Clock>,
}

impl FinalizationRecorder {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Write the session's segments onto the trailing user/assistant pair.
    ///
    /// Returns false when the session was already finalized, in which case
    /// nothing is touched.
    pub fn finalize(&self, session: &mut StreamSession, conversation: &mut Conversation) -> bool {
        if session.finalized {
            debug!("Session {} already finalized", session.session_id);
            return false;
        }
        session.finalized = true;
        let now = self.clock.now_millis();

        let len = conversation.messages.len();
        if len >= 2 && conversation.messages[len - 2].role == Role::User {
            let user = &mut conversation.messages[len - 2];
            if user.timestamp().is_none() {
                user.set_metadata(TIMESTAMP, session.start_timestamp);
            }
            user.set_metadata(CONVERSATION_ID, session.conversation_id.as_str());
        } else {
            error!(
                "No user message found before the response. [conversationId={}]",
                session.conversation_id
            );
        }

        let Some(assistant) = conversation
            .messages
            .last_mut()
            .filter(|m| m.role == Role::Assistant)
        else {
            error!(
                "No assistant message to finalize. [conversationId={}]",
                session.conversation_id
            );
            return true;
        };

        let response_timestamp = match &session.reasoning {
            Some(reasoning) => {
                assistant.set_metadata(THINK_TIMESTAMP, reasoning.opened_at);
                assistant.set_metadata(THINK_PROCESS, reasoning.text.as_str());
                reasoning.closed_at.unwrap_or(now)
            }
            None => session.response_timestamp.unwrap_or(now),
        };
        if let Some(tool_activity) = &session.tool_activity {
            assistant.set_metadata(TOOL_PROCESS_TIMESTAMP, tool_activity.opened_at);
            assistant.set_metadata(TOOL_PROCESS_MESSAGES, tool_activity.text.as_str());
        }
        assistant.set_metadata(TIMESTAMP, response_timestamp);
        assistant.set_metadata(CONVERSATION_ID, session.conversation_id.as_str());
        assistant.text = session.answer_text().to_string();

        debug!(
            "Finalized session {} ({} answer chars, cancelled: {})",
            session.session_id,
            assistant.text.len(),
            session.cancelled
        );
        true
    }
}

/// Store the chat meta on the most recent user message. Returns false (and
/// logs) when the conversation has no user message.
pub fn apply_chat_meta(conversation: &mut Conversation, metadata: &ResponseMetadata) -> bool {
    let conversation_id = conversation.conversation_id.clone();
    let Some(user) = conversation
        .messages
        .iter_mut()
        .rev()
        .find(|m| m.role == Role::User)
    else {
        error!(
            "No user message found in chat history to update metadata. [conversationId={}]",
            conversation_id
        );
        return false;
    };
    match serde_json::to_value(ChatMeta::from(metadata)) {
        Ok(value) => {
            user.set_metadata(CHAT_META, value);
            true
        }
        Err(e) => {
            error!("Failed to encode chat meta for {}: {}", conversation_id, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::RetrievedDocument;
    use crate::session::classifier::SegmentClassifier;
    use chatlab_common::{ChatOptions, ManualClock};
    use chatlab_core::Message;

    fn pending_conversation() -> Conversation {
        let mut conversation = Conversation::new(None, ChatOptions::default(), 0);
        conversation.messages.push(Message::user("hi"));
        conversation.messages.push(Message::assistant_placeholder());
        conversation
    }

    #[test]
    fn test_finalize_writes_all_keys() {
        let clock = Arc::new(ManualClock::new(100));
        let classifier = SegmentClassifier::new(clock.clone());
        let recorder = FinalizationRecorder::new(clock.clone());
        let mut conversation = pending_conversation();
        let mut session = StreamSession::new(conversation.conversation_id.clone(), 100);

        classifier.on_delta(&mut session, "<think>");
        clock.set(110);
        classifier.on_delta(&mut session, "plan");
        clock.set(120);
        classifier.on_delta(&mut session, "</think>");
        clock.set(130);
        classifier.on_activity(
            &mut session,
            &crate::activity::ToolActivity::Error("oops".to_string()),
        );
        clock.set(140);
        classifier.on_delta(&mut session, "done");
        clock.set(200);

        assert!(recorder.finalize(&mut session, &mut conversation));
        let user = &conversation.messages[0];
        let assistant = &conversation.messages[1];
        assert_eq!(user.timestamp(), Some(100));
        assert_eq!(assistant.text, "done");
        assert_eq!(assistant.metadata_i64(THINK_TIMESTAMP), Some(110));
        assert_eq!(assistant.metadata_str(THINK_PROCESS), Some("plan"));
        assert_eq!(assistant.metadata_i64(TOOL_PROCESS_TIMESTAMP), Some(130));
        assert!(assistant.metadata_str(TOOL_PROCESS_MESSAGES).unwrap().ends_with(" : oops\n\n"));
        assert_eq!(assistant.timestamp(), Some(120));
        assert_eq!(
            assistant.metadata_str(CONVERSATION_ID),
            Some(conversation.conversation_id.as_str())
        );
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let clock = Arc::new(ManualClock::new(100));
        let classifier = SegmentClassifier::new(clock.clone());
        let recorder = FinalizationRecorder::new(clock.clone());
        let mut conversation = pending_conversation();
        let mut session = StreamSession::new(conversation.conversation_id.clone(), 100);
        classifier.on_delta(&mut session, "a");

        assert!(recorder.finalize(&mut session, &mut conversation));
        let once = conversation.clone();
        clock.set(999);
        assert!(!recorder.finalize(&mut session, &mut conversation));
        assert_eq!(conversation, once);
    }

    #[test]
    fn test_unclosed_reasoning_uses_finalize_time() {
        let clock = Arc::new(ManualClock::new(100));
        let classifier = SegmentClassifier::new(clock.clone());
        let recorder = FinalizationRecorder::new(clock.clone());
        let mut conversation = pending_conversation();
        let mut session = StreamSession::new(conversation.conversation_id.clone(), 100);
        classifier.on_delta(&mut session, "<think>");
        classifier.on_delta(&mut session, "still thinking");
        clock.set(150);

        recorder.finalize(&mut session, &mut conversation);
        assert_eq!(conversation.messages[1].timestamp(), Some(150));
        assert_eq!(conversation.messages[1].text, "");
    }

    #[test]
    fn test_missing_user_message_still_finalizes_assistant() {
        let clock = Arc::new(ManualClock::new(100));
        let recorder = FinalizationRecorder::new(clock);
        let mut conversation = Conversation::new(None, ChatOptions::default(), 0);
        conversation.messages.push(Message::assistant_placeholder());
        let mut session = StreamSession::new(conversation.conversation_id.clone(), 50);

        assert!(recorder.finalize(&mut session, &mut conversation));
        assert_eq!(conversation.messages[0].timestamp(), Some(100));
    }

    #[test]
    fn test_existing_user_timestamp_is_kept() {
        let recorder = FinalizationRecorder::new(Arc::new(ManualClock::new(100)));
        let mut conversation = pending_conversation();
        conversation.messages[0].set_metadata(TIMESTAMP, 7);
        let mut session = StreamSession::new(conversation.conversation_id.clone(), 50);
        recorder.finalize(&mut session, &mut conversation);
        assert_eq!(conversation.messages[0].timestamp(), Some(7));
    }

    #[test]
    fn test_apply_chat_meta() {
        let mut conversation = pending_conversation();
        let metadata = ResponseMetadata {
            model: Some("qwen3".to_string()),
            usage: Some(Usage {
                prompt_tokens: Some(3),
                completion_tokens: Some(4),
                total_tokens: Some(7),
            }),
            retrieved_documents: vec![RetrievedDocument::new("d1", "text")],
        };
        assert!(apply_chat_meta(&mut conversation, &metadata));
        let stored = &conversation.messages[0].metadata[CHAT_META];
        assert_eq!(stored["model"], "qwen3");
        assert_eq!(stored["usage"]["totalTokens"], 7);
        assert_eq!(stored["retrievedDocumentCount"], 1);
        assert_eq!(stored["retrievedDocumentIds"][0], "d1");

        let mut empty = Conversation::new(None, ChatOptions::default(), 0);
        assert!(!apply_chat_meta(&mut empty, &metadata));
    }
}

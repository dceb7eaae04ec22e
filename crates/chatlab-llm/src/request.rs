//! Provider request assembly
//!
//! Turns conversation state, an optional retrieval filter and the tool
//! bindings into a provider-agnostic `ProviderRequest`. Assembly is a pure
//! data transformation and cannot fail.

use crate::activity::ActivitySink;
use crate::provider::{ModelRequest, PromptMessage};
use crate::tools::ToolBinding;
use chatlab_common::constants::request_keys::{
    CONVERSATION_ID, DOC_INFO_ID, RAG_FILTER_EXPRESSION, TOOL_ACTIVITY_SINK,
};
use chatlab_common::{ChatOptions, is_blank};
use chatlab_core::{Conversation, Role};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Values handed to tool execution, keyed by well-known names
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    sinks: HashMap<String, ActivitySink>,
}

impl ToolContext {
    pub fn insert_sink(&mut self, key: &str, sink: ActivitySink) {
        self.sinks.insert(key.to_string(), sink);
    }

    pub fn sink(&self, key: &str) -> Option<&ActivitySink> {
        self.sinks.get(key)
    }

    /// The sink tool execution reports activity to
    pub fn activity_sink(&self) -> Option<&ActivitySink> {
        self.sink(TOOL_ACTIVITY_SINK)
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

/// Everything needed to run one generation
#[derive(Clone)]
pub struct ProviderRequest {
    pub conversation_id: String,
    pub options: ChatOptions,
    /// System prompt (if any), prior history, then the new user prompt
    pub messages: Vec<PromptMessage>,
    pub user_prompt: String,
    pub advisor_params: BTreeMap<String, String>,
    pub tools: Vec<Arc<dyn ToolBinding>>,
    pub tool_context: ToolContext,
}

impl ProviderRequest {
    /// Filter expression for the retrieval advisor, absent when retrieval is skipped
    pub fn retrieval_filter(&self) -> Option<&str> {
        self.advisor_params
            .get(RAG_FILTER_EXPRESSION)
            .map(String::as_str)
    }

    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    /// The request as the provider sees it, with the user prompt replaced
    pub fn to_model_request(&self, user_prompt: &str) -> ModelRequest {
        let mut messages = self.messages.clone();
        if let Some(PromptMessage::User(last)) = messages.last_mut() {
            *last = user_prompt.to_string();
        }
        ModelRequest {
            messages,
            options: self.options.clone(),
            tools: self.tools.iter().map(|t| t.spec()).collect(),
        }
    }
}

impl std::fmt::Debug for ProviderRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRequest")
            .field("conversation_id", &self.conversation_id)
            .field("options", &self.options)
            .field("messages", &self.messages)
            .field("advisor_params", &self.advisor_params)
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

pub struct RequestAssembler;

impl RequestAssembler {
    /// Build the request for a new user prompt.
    ///
    /// `conversation` must not contain the new prompt yet; its existing user
    /// and assistant messages become the history sent to the provider.
    pub fn assemble(
        conversation: &Conversation,
        user_prompt: &str,
        retrieval_filter: Option<&str>,
        tool_bindings: &[Arc<dyn ToolBinding>],
        activity_sink: &ActivitySink,
    ) -> ProviderRequest {
        let mut messages = Vec::with_capacity(conversation.messages.len() + 2);
        if let Some(system_prompt) = conversation
            .system_prompt
            .as_deref()
            .filter(|p| !is_blank(p))
        {
            messages.push(PromptMessage::System(system_prompt.to_string()));
        }
        for message in &conversation.messages {
            match message.role {
                Role::User => messages.push(PromptMessage::User(message.text.clone())),
                Role::Assistant if !message.text.is_empty() => {
                    messages.push(PromptMessage::Assistant(message.text.clone()))
                }
                _ => {}
            }
        }
        messages.push(PromptMessage::User(user_prompt.to_string()));

        let mut advisor_params = BTreeMap::new();
        advisor_params.insert(
            CONVERSATION_ID.to_string(),
            conversation.conversation_id.clone(),
        );
        if let Some(filter) = retrieval_filter.filter(|f| !is_blank(f)) {
            advisor_params.insert(RAG_FILTER_EXPRESSION.to_string(), filter.to_string());
        }

        let mut tool_context = ToolContext::default();
        if !tool_bindings.is_empty() {
            tool_context.insert_sink(TOOL_ACTIVITY_SINK, activity_sink.clone());
        }

        ProviderRequest {
            conversation_id: conversation.conversation_id.clone(),
            options: conversation.chat_options.clone(),
            messages,
            user_prompt: user_prompt.to_string(),
            advisor_params,
            tools: tool_bindings.to_vec(),
            tool_context,
        }
    }
}

/// Filter expression selecting the given document ids, or `None` for no ids
pub fn build_filter_expression(doc_info_ids: &[String]) -> Option<String> {
    if doc_info_ids.is_empty() {
        return None;
    }
    Some(format!(
        "{} in ['{}']",
        DOC_INFO_ID,
        doc_info_ids.join("', '")
    ))
}

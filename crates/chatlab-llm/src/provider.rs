//! Language-model provider interface
//!
//! The engine never talks to a vendor API directly. It hands a `ModelRequest`
//! to a `ChatProvider`, which either streams `GenerationChunk`s back or
//! returns one complete `Generation`.

use crate::retrieval::RetrievedDocument;
use anyhow::Result;
use async_trait::async_trait;
use chatlab_common::ChatOptions;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

/// Token usage counts reported by the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl Usage {
    /// Add another round's counts. A count stays `None` only when both sides
    /// lack it.
    pub fn add(&mut self, other: &Usage) {
        fn sum(a: Option<u32>, b: Option<u32>) -> Option<u32> {
            match (a, b) {
                (None, None) => None,
                (a, b) => Some(a.unwrap_or(0).saturating_add(b.unwrap_or(0))),
            }
        }
        self.prompt_tokens = sum(self.prompt_tokens, other.prompt_tokens);
        self.completion_tokens = sum(self.completion_tokens, other.completion_tokens);
        self.total_tokens = sum(self.total_tokens, other.total_tokens);
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One message of the prompt sent to the provider
#[derive(Debug, Clone, PartialEq)]
pub enum PromptMessage {
    System(String),
    User(String),
    Assistant(String),
    /// Assistant turn that only requested tool calls
    AssistantToolCalls(Vec<ToolCallRequest>),
    ToolResult {
        call_id: String,
        name: String,
        content: String,
    },
}

/// Tool description advertised to the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// What the provider actually receives
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub messages: Vec<PromptMessage>,
    pub options: ChatOptions,
    pub tools: Vec<ToolSpec>,
}

/// Incremental piece of a streamed generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationChunk {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub model: Option<String>,
    pub usage: Option<Usage>,
}

impl GenerationChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// A complete single-shot generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub model: Option<String>,
    pub usage: Option<Usage>,
}

/// Terminal metadata of a generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseMetadata {
    pub model: Option<String>,
    pub usage: Option<Usage>,
    pub retrieved_documents: Vec<RetrievedDocument>,
}

impl ResponseMetadata {
    /// Take model and usage from a chunk, keeping existing values where the
    /// chunk has none.
    pub fn merge_chunk(&mut self, chunk: &GenerationChunk) {
        if chunk.model.is_some() {
            self.model = chunk.model.clone();
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage.clone();
        }
    }

    /// Fold in one provider round of a tool loop: the latest model wins and
    /// usage is summed over rounds.
    pub fn add_round(&mut self, model: Option<String>, usage: Option<Usage>) {
        if model.is_some() {
            self.model = model;
        }
        if let Some(usage) = usage {
            self.usage.get_or_insert_with(Usage::default).add(&usage);
        }
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<GenerationChunk>> + Send>>;

/// A language-model backend
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name used in logs
    fn name(&self) -> &str;

    /// Start a streaming generation. Errors may surface either here or as an
    /// `Err` item in the stream.
    async fn stream(&self, request: &ModelRequest) -> Result<ChunkStream>;

    /// Run a generation to completion
    async fn invoke(&self, request: &ModelRequest) -> Result<Generation>;
}

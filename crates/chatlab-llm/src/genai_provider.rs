//! `ChatProvider` backed by the genai multi-provider client
//!
//! genai picks the vendor adapter from the model name. Reasoning output that
//! genai reports separately is re-wrapped in `<think>` markers so the
//! classifier sees the same shape as models that inline their reasoning.

use crate::provider::{
    ChatProvider, ChunkStream, Generation, GenerationChunk, ModelRequest, PromptMessage,
    ToolCallRequest, Usage,
};
use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chatlab_common::ProviderConfig;
use chatlab_common::constants::{THINK_CLOSE, THINK_OPEN};
use futures_util::StreamExt;
use genai::Client as GenaiClient;
use genai::ModelIden;
use genai::chat::{
    ChatMessage as GenaiChatMessage, ChatOptions as GenaiChatOptions, ChatRequest,
    ChatStreamEvent, ContentPart, MessageContent, Tool, ToolCall as GenaiToolCall,
    ToolResponse as GenaiToolResponse,
};
use genai::resolver::{AuthData, AuthResolver};
use serde_json::json;
use tracing::{debug, info, warn};

pub struct GenaiProvider {
    client: GenaiClient,
    name: String,
    default_model: String,
}

impl GenaiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, Error> {
        let mut builder = GenaiClient::builder().with_chat_options(GenaiChatOptions {
            capture_content: Some(true),
            capture_reasoning_content: Some(true),
            capture_tool_calls: Some(true),
            capture_usage: Some(true),
            ..Default::default()
        });

        if let Some(api_key) = config.api_key.clone().filter(|k| !k.trim().is_empty()) {
            let auth_resolver = AuthResolver::from_resolver_fn(
                move |_model_iden: ModelIden| -> Result<Option<AuthData>, genai::resolver::Error> {
                    Ok(Some(AuthData::from_single(api_key.clone())))
                },
            );
            builder = builder.with_auth_resolver(auth_resolver);
        }
        if let Some(base_url) = &config.base_url {
            warn!(
                "base_url {} is ignored; genai uses the vendor's default endpoint",
                base_url
            );
        }

        info!(
            "Created genai provider {} (default model {})",
            config.name, config.default_model
        );
        Ok(Self {
            client: builder.build(),
            name: config.name.clone(),
            default_model: config.default_model.clone(),
        })
    }

    fn model_for(&self, request: &ModelRequest) -> String {
        request
            .options
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn chat_options(request: &ModelRequest) -> GenaiChatOptions {
        let options = &request.options;
        let mut chat_options = GenaiChatOptions::default();
        if let Some(temperature) = options.temperature {
            chat_options = chat_options.with_temperature(temperature);
        }
        if let Some(top_p) = options.top_p {
            chat_options = chat_options.with_top_p(top_p);
        }
        if let Some(max_tokens) = options.max_tokens {
            chat_options = chat_options.with_max_tokens(max_tokens);
        }
        if options.top_k.is_some()
            || options.frequency_penalty.is_some()
            || options.presence_penalty.is_some()
        {
            debug!("top_k and penalty options are not forwarded by the genai provider");
        }
        chat_options
    }

    fn chat_request(request: &ModelRequest) -> Result<ChatRequest> {
        let messages = request
            .messages
            .iter()
            .map(to_genai_message)
            .collect::<Result<Vec<_>>>()?;
        let mut chat_req = ChatRequest::new(messages);
        if !request.tools.is_empty() {
            let tools: Vec<Tool> = request
                .tools
                .iter()
                .map(|spec| {
                    Tool::new(spec.name.clone())
                        .with_description(spec.description.clone())
                        .with_schema(spec.schema.clone())
                })
                .collect();
            debug!(
                "Adding {} tools to request: {:?}",
                tools.len(),
                tools.iter().map(|t| &t.name).collect::<Vec<_>>()
            );
            chat_req = chat_req.with_tools(tools);
        }
        Ok(chat_req)
    }
}

fn to_genai_message(message: &PromptMessage) -> Result<GenaiChatMessage> {
    Ok(match message {
        PromptMessage::System(text) => GenaiChatMessage::system(text.clone()),
        PromptMessage::User(text) => GenaiChatMessage::user(text.clone()),
        PromptMessage::Assistant(text) => GenaiChatMessage::assistant(text.clone()),
        PromptMessage::AssistantToolCalls(calls) => {
            let calls = calls
                .iter()
                .map(to_genai_tool_call)
                .collect::<Result<Vec<_>>>()?;
            GenaiChatMessage::from(calls)
        }
        PromptMessage::ToolResult {
            call_id, content, ..
        } => GenaiChatMessage::from(GenaiToolResponse::new(call_id.clone(), content.clone())),
    })
}

fn to_genai_tool_call(call: &ToolCallRequest) -> Result<GenaiToolCall> {
    serde_json::from_value(json!({
        "call_id": call.id,
        "fn_name": call.name,
        "fn_arguments": call.arguments,
    }))
    .map_err(|e| anyhow!("Invalid tool call {}: {}", call.name, e))
}

fn from_genai_tool_call(call: GenaiToolCall) -> ToolCallRequest {
    ToolCallRequest {
        id: call.call_id,
        name: call.fn_name,
        arguments: call.fn_arguments,
    }
}

fn from_genai_usage(usage: &genai::chat::Usage) -> Usage {
    let count = |v: Option<i32>| v.and_then(|n| u32::try_from(n).ok());
    Usage {
        prompt_tokens: count(usage.prompt_tokens),
        completion_tokens: count(usage.completion_tokens),
        total_tokens: count(usage.total_tokens),
    }
}

/// Tracks whether a reasoning span is open while converting stream events
struct ReasoningWrapper {
    model: String,
    in_reasoning: bool,
}

impl ReasoningWrapper {
    fn text(&self, text: impl Into<String>) -> Result<GenerationChunk> {
        Ok(GenerationChunk {
            text: Some(text.into()),
            model: Some(self.model.clone()),
            ..Default::default()
        })
    }

    fn close_reasoning(&mut self, out: &mut Vec<Result<GenerationChunk>>) {
        if self.in_reasoning {
            self.in_reasoning = false;
            out.push(self.text(THINK_CLOSE));
        }
    }

    fn convert(&mut self, event: Result<ChatStreamEvent, genai::Error>) -> Vec<Result<GenerationChunk>> {
        let mut out = Vec::new();
        match event {
            Err(e) => out.push(Err(anyhow!("GenAI stream error: {}", e))),
            Ok(ChatStreamEvent::Start) => {
                debug!("Stream started for model {}", self.model);
            }
            Ok(ChatStreamEvent::Chunk(c)) => {
                self.close_reasoning(&mut out);
                out.push(self.text(c.content));
            }
            Ok(ChatStreamEvent::ReasoningChunk(c)) => {
                if !self.in_reasoning {
                    self.in_reasoning = true;
                    out.push(self.text(THINK_OPEN));
                }
                out.push(self.text(c.content));
            }
            Ok(ChatStreamEvent::ToolCallChunk(t)) => {
                debug!("Received tool call chunk: {:?}", t);
                self.close_reasoning(&mut out);
                out.push(Ok(GenerationChunk {
                    tool_calls: vec![from_genai_tool_call(t.tool_call)],
                    model: Some(self.model.clone()),
                    ..Default::default()
                }));
            }
            Ok(ChatStreamEvent::End(end)) => {
                self.close_reasoning(&mut out);
                out.push(Ok(GenerationChunk {
                    model: Some(self.model.clone()),
                    usage: end.captured_usage.as_ref().map(from_genai_usage),
                    ..Default::default()
                }));
            }
        }
        out
    }
}

#[async_trait]
impl ChatProvider for GenaiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: &ModelRequest) -> Result<ChunkStream> {
        let model = self.model_for(request);
        let chat_req = Self::chat_request(request)?;
        let options = Self::chat_options(request);
        debug!(
            "Streaming {} messages to model {}",
            request.messages.len(),
            model
        );

        let response = self
            .client
            .exec_chat_stream(&model, chat_req, Some(&options))
            .await
            .map_err(|e| anyhow!("GenAI API error: {}", e))?;

        let mut wrapper = ReasoningWrapper {
            model,
            in_reasoning: false,
        };
        let stream = response
            .stream
            .map(move |event| wrapper.convert(event))
            .flat_map(futures::stream::iter);
        Ok(Box::pin(stream))
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<Generation> {
        let model = self.model_for(request);
        let chat_req = Self::chat_request(request)?;
        let options = Self::chat_options(request);
        debug!(
            "Executing chat request with {} messages on model {}",
            request.messages.len(),
            model
        );

        let response = self
            .client
            .exec_chat(&model, chat_req, Some(&options))
            .await
            .map_err(|e| anyhow!("GenAI API error: {}", e))?;

        let mut text = String::new();
        if let Some(reasoning) = response.reasoning_content.as_deref().filter(|r| !r.is_empty()) {
            text.push_str(THINK_OPEN);
            text.push_str(reasoning);
            text.push_str(THINK_CLOSE);
        }
        let mut tool_calls = Vec::new();
        for content in response.content {
            match content {
                MessageContent::Text(t) => text.push_str(&t),
                MessageContent::ToolCalls(calls) => {
                    tool_calls.extend(calls.into_iter().map(from_genai_tool_call))
                }
                MessageContent::Parts(parts) => {
                    for part in parts {
                        if let ContentPart::Text(t) = part {
                            text.push_str(&t);
                        }
                    }
                }
                MessageContent::ToolResponses(_) => {
                    warn!("Model unexpectedly returned tool responses");
                }
            }
        }

        Ok(Generation {
            text,
            tool_calls,
            model: Some(model),
            usage: Some(from_genai_usage(&response.usage)),
        })
    }
}

//! Tool bindings and tool execution
//!
//! A `ToolBinding` is one callable tool exposed to the model. The
//! `ToolExecutor` runs the calls of one model turn, reports what it does on
//! the activity sink and returns the history fragment that goes back to the
//! provider.

use crate::activity::{ActivitySink, ToolActivity};
use crate::provider::{PromptMessage, ToolCallRequest, ToolSpec};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A tool the model can call
#[async_trait]
pub trait ToolBinding: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the tool's arguments
    fn schema(&self) -> Value;

    async fn call(&self, arguments: Value) -> Result<Value>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            schema: self.schema(),
        }
    }
}

/// Text sent back to the model for a tool's return value
fn result_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Turn the last message of a tool round into an activity event. Anything
/// that is not a tool result becomes a descriptive error entry.
pub fn format_tool_result(message: Option<&PromptMessage>) -> ToolActivity {
    match message {
        Some(PromptMessage::ToolResult {
            call_id,
            name,
            content,
        }) => ToolActivity::ToolResult {
            id: call_id.clone(),
            name: name.clone(),
            response_data: serde_json::from_str(content)
                .unwrap_or_else(|_| Value::String(content.clone())),
        },
        other => ToolActivity::Error(format!(
            "Tool processing error: last history message is not a tool result. Actual type: {}",
            describe(other)
        )),
    }
}

fn describe(message: Option<&PromptMessage>) -> &'static str {
    match message {
        None => "none",
        Some(PromptMessage::System(_)) => "system",
        Some(PromptMessage::User(_)) => "user",
        Some(PromptMessage::Assistant(_)) => "assistant",
        Some(PromptMessage::AssistantToolCalls(_)) => "assistant tool calls",
        Some(PromptMessage::ToolResult { .. }) => "tool result",
    }
}

/// Executes tool calls against a set of bindings
pub struct ToolExecutor {
    tools: Vec<Arc<dyn ToolBinding>>,
}

impl ToolExecutor {
    pub fn new(tools: Vec<Arc<dyn ToolBinding>>) -> Self {
        Self { tools }
    }

    pub fn find_tool(&self, name: &str) -> Option<&Arc<dyn ToolBinding>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Run every call of one model turn.
    ///
    /// Emits the user echo, then each call, then each result. The returned
    /// fragment is the assistant tool-call turn followed by one tool result
    /// per call, in call order.
    pub async fn execute(
        &self,
        user_prompt: &str,
        calls: &[ToolCallRequest],
        sink: Option<&ActivitySink>,
    ) -> Vec<PromptMessage> {
        let emit = |activity: ToolActivity| {
            if let Some(sink) = sink {
                sink.emit(activity);
            }
        };

        emit(ToolActivity::UserEcho {
            content: user_prompt.to_string(),
        });
        for call in calls {
            emit(ToolActivity::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });
        }

        let mut fragment = Vec::with_capacity(calls.len() + 1);
        fragment.push(PromptMessage::AssistantToolCalls(calls.to_vec()));
        for call in calls {
            let content = self.run_call(call).await;
            fragment.push(PromptMessage::ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content,
            });
        }

        for index in 0..calls.len() {
            emit(format_tool_result(fragment.get(index + 1)));
        }
        fragment
    }

    async fn run_call(&self, call: &ToolCallRequest) -> String {
        let Some(tool) = self.find_tool(&call.name) else {
            warn!("Tool not found: {}", call.name);
            return format!(
                "Tool '{}' not found. Available tools: {:?}",
                call.name,
                self.tools.iter().map(|t| t.name()).collect::<Vec<_>>()
            );
        };

        debug!("Executing tool: {} with args: {}", call.name, call.arguments);
        match tool.call(call.arguments.clone()).await {
            Ok(value) => {
                info!("Tool {} completed", call.name);
                result_content(&value)
            }
            Err(e) => {
                warn!("Tool {} failed: {}", call.name, e);
                format!("Error executing tool {}: {}", call.name, e)
            }
        }
    }
}

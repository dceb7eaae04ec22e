//! Tool activity events and the sink they travel through
//!
//! Tool execution runs beside the token stream, so its events go through a
//! separate channel. The sink is cloneable and can be used from any task.

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::debug;

/// One entry of the tool-activity transcript
#[derive(Debug, Clone, PartialEq)]
pub enum ToolActivity {
    /// The user prompt that led to the tool round
    UserEcho { content: String },
    /// A tool call issued by the model
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    /// The result of a tool call
    ToolResult {
        id: String,
        name: String,
        response_data: Value,
    },
    /// A result that could not be read as a tool result
    Error(String),
}

impl ToolActivity {
    /// A tool result closes the visible tool panel
    pub fn is_tool_result(&self) -> bool {
        matches!(self, ToolActivity::ToolResult { .. })
    }

    /// Text written to the transcript for this event
    pub fn transcript_text(&self) -> String {
        let value = match self {
            ToolActivity::UserEcho { content } => json!({"role": "user", "content": content}),
            ToolActivity::ToolCall {
                id,
                name,
                arguments,
            } => json!({
                "role": "assistant",
                "toolCalls": [{"id": id, "name": name, "arguments": arguments}]
            }),
            ToolActivity::ToolResult {
                id,
                name,
                response_data,
            } => json!({"role": "tool", "name": name, "id": id, "responseData": response_data}),
            ToolActivity::Error(message) => return message.clone(),
        };
        value.to_string()
    }
}

/// Thread-safe, append-only sender of tool activity
#[derive(Debug, Clone)]
pub struct ActivitySink {
    sender: mpsc::UnboundedSender<ToolActivity>,
}

impl ActivitySink {
    /// Create a sink and the receiver the session consumes
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ToolActivity>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn emit(&self, activity: ToolActivity) {
        if self.sender.send(activity).is_err() {
            debug!("Tool activity dropped, session no longer listening");
        }
    }
}

//! Common constants used across chatlab

/// Prefix of every conversation id, so persisted conversations can be told
/// apart from other entity kinds.
pub const CONVERSATION_ID_PREFIX: &str = "Chat-";

/// Titles longer than this many characters are truncated and get an ellipsis.
pub const TITLE_MAX_CHARS: usize = 20;

/// Marker that opens a reasoning span in a content delta.
pub const THINK_OPEN: &str = "<think>";

/// Marker that closes a reasoning span in a content delta.
pub const THINK_CLOSE: &str = "</think>";

/// Upper bound on provider/tool round trips for a single generation.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

/// Default buffer size for the segment update channel handed to the UI.
pub const DEFAULT_UPDATE_BUFFER: usize = 1000;

/// Message metadata keys. They are persisted, so they must never change.
pub mod metadata {
    pub const TIMESTAMP: &str = "timestamp";
    pub const CONVERSATION_ID: &str = "conversationId";
    pub const THINK_TIMESTAMP: &str = "thinkTimestamp";
    pub const THINK_PROCESS: &str = "thinkProcess";
    pub const TOOL_PROCESS_TIMESTAMP: &str = "mcpToolProcessTimestamp";
    pub const TOOL_PROCESS_MESSAGES: &str = "mcpToolProcessMessages";
    pub const CHAT_META: &str = "chatMeta";
}

/// Advisor parameter and tool-context keys carried on provider requests.
pub mod request_keys {
    pub const CONVERSATION_ID: &str = "conversationId";
    pub const RAG_FILTER_EXPRESSION: &str = "ragFilterExpression";
    pub const TOOL_ACTIVITY_SINK: &str = "mcpProcessMessageConsumer";
    /// Document field used by retrieval filter expressions.
    pub const DOC_INFO_ID: &str = "docInfoId";
}

/// Default timeout values in seconds
pub mod timeouts {
    pub const DEFAULT_LLM_TIMEOUT: u64 = 120;
}

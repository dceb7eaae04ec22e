//! Common utility functions used across chatlab components

use crate::constants::{CONVERSATION_ID_PREFIX, TITLE_MAX_CHARS};
use chrono::{DateTime, Local, Utc};
use uuid::Uuid;

/// Generate a unique ID
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a new conversation id (`Chat-<uuid>`)
pub fn generate_conversation_id() -> String {
    format!("{}{}", CONVERSATION_ID_PREFIX, generate_id())
}

/// Get current UTC timestamp as milliseconds
pub fn current_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert timestamp milliseconds to DateTime
pub fn timestamp_millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Render epoch millis in the local zone as `yyyy-MM-ddTHH:mm:ss`
pub fn format_local_timestamp(millis: i64) -> String {
    timestamp_millis_to_datetime(millis)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// True when the string is empty or only whitespace
pub fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Truncate to `max_chars` characters and append `...` when anything was cut.
/// Counts characters, not bytes, so multi-byte prompts never split mid-char.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &s[..byte_idx]),
        None => s.to_string(),
    }
}

/// Build a conversation title from the first user prompt
pub fn build_title(user_prompt: &str) -> String {
    truncate_with_ellipsis(user_prompt.trim(), TITLE_MAX_CHARS)
}

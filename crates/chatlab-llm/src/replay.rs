//! Rebuild display segments from a persisted message
//!
//! Reasoning and tool activity are ordered by their open timestamps; the
//! answer always comes last. Older saves kept the reasoning inline as
//! `<think>...</think>` in the text with only a `thinkTimestamp` key; those
//! spans are cut out of the answer and shown as reasoning.

use crate::session::SegmentKind;
use anyhow::Result;
use chatlab_common::constants::metadata::{
    THINK_PROCESS, THINK_TIMESTAMP, TOOL_PROCESS_MESSAGES, TOOL_PROCESS_TIMESTAMP,
};
use chatlab_core::{Message, Role};
use regex::Regex;
use serde::Serialize;

const INLINE_THINK_PATTERN: &str = r"(?s)<think>(.*?)</think>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplaySegment {
    pub kind: SegmentKind,
    pub text: String,
    pub timestamp: Option<i64>,
}

/// Split inline `<think>` spans from `text`.
///
/// Returns the concatenated reasoning, if any span was found, and the
/// remaining text.
pub fn extract_think(text: &str) -> Result<(Option<String>, String)> {
    let pattern = Regex::new(INLINE_THINK_PATTERN)?;
    let reasoning: Vec<&str> = pattern
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    if reasoning.is_empty() {
        return Ok((None, text.to_string()));
    }
    let answer = pattern.replace_all(text, "");
    Ok((Some(reasoning.concat()), answer.trim_start().to_string()))
}

/// Ordered display segments for one message
pub fn replay_message(message: &Message) -> Result<Vec<ReplaySegment>> {
    let timestamp = message.timestamp();
    if message.role != Role::Assistant {
        return Ok(vec![ReplaySegment {
            kind: SegmentKind::Answer,
            text: message.text.clone(),
            timestamp,
        }]);
    }

    let mut segments = Vec::new();
    let mut answer = message.text.clone();
    let think_timestamp = message.metadata_i64(THINK_TIMESTAMP);

    match message.metadata_str(THINK_PROCESS) {
        Some(reasoning) if !reasoning.is_empty() => segments.push(ReplaySegment {
            kind: SegmentKind::Reasoning,
            text: reasoning.to_string(),
            timestamp: think_timestamp,
        }),
        _ if think_timestamp.is_some() => {
            let (reasoning, rest) = extract_think(&message.text)?;
            if let Some(reasoning) = reasoning {
                segments.push(ReplaySegment {
                    kind: SegmentKind::Reasoning,
                    text: reasoning,
                    timestamp: think_timestamp,
                });
                answer = rest;
            }
        }
        _ => {}
    }

    if let Some(transcript) = message
        .metadata_str(TOOL_PROCESS_MESSAGES)
        .filter(|t| !t.is_empty())
    {
        segments.push(ReplaySegment {
            kind: SegmentKind::ToolActivity,
            text: transcript.to_string(),
            timestamp: message.metadata_i64(TOOL_PROCESS_TIMESTAMP),
        });
    }

    segments.sort_by_key(|s| s.timestamp.unwrap_or(i64::MAX));
    if !answer.is_empty() {
        segments.push(ReplaySegment {
            kind: SegmentKind::Answer,
            text: answer,
            timestamp,
        });
    }
    Ok(segments)
}

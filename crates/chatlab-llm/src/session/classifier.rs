//! Segment classification for one streaming session
//!
//! `SegmentClassifier` feeds content deltas and tool activity through
//! `transition` and applies the resulting effects to a `StreamSession`,
//! stamping segments with the session clock. Each applied event yields the
//! `SegmentUpdate`s a display layer needs.

use super::state::{ClassifierEvent, ClassifierState, Effect, Mode, transition};
use crate::activity::ToolActivity;
use chatlab_common::{Clock, format_local_timestamp, generate_id};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Display kind of a run of content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentKind {
    Answer,
    Reasoning,
    ToolActivity,
}

/// A run of content of one kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub text: String,
    pub opened_at: i64,
    pub closed_at: Option<i64>,
}

impl Segment {
    fn open(kind: SegmentKind, at: i64) -> Self {
        Self {
            kind,
            text: String::new(),
            opened_at: at,
            closed_at: None,
        }
    }
}

/// Display update produced while classifying
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentUpdate {
    Opened { kind: SegmentKind, at: i64 },
    Appended { kind: SegmentKind, text: String },
    Closed { kind: SegmentKind, at: i64 },
    /// A tool result arrived; the tool panel can be folded away
    CollapseToolActivity,
}

/// Transient state of one in-flight generation
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub session_id: String,
    pub conversation_id: String,
    pub state: ClassifierState,
    pub answer: Option<Segment>,
    pub reasoning: Option<Segment>,
    pub tool_activity: Option<Segment>,
    /// Captured at submit
    pub start_timestamp: i64,
    /// Captured at the first visible answer delta
    pub response_timestamp: Option<i64>,
    pub cancelled: bool,
    pub finalized: bool,
}

impl StreamSession {
    pub fn new(conversation_id: impl Into<String>, start_timestamp: i64) -> Self {
        Self {
            session_id: generate_id(),
            conversation_id: conversation_id.into(),
            state: ClassifierState::default(),
            answer: None,
            reasoning: None,
            tool_activity: None,
            start_timestamp,
            response_timestamp: None,
            cancelled: false,
            finalized: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    /// Answer text so far (markers stripped)
    pub fn answer_text(&self) -> &str {
        self.answer.as_ref().map_or("", |s| s.text.as_str())
    }

    pub fn reasoning_text(&self) -> Option<&str> {
        self.reasoning.as_ref().map(|s| s.text.as_str())
    }

    pub fn tool_activity_text(&self) -> Option<&str> {
        self.tool_activity.as_ref().map(|s| s.text.as_str())
    }
}

/// Applies classifier effects to a session
#[derive(Clone)]
pub struct SegmentClassifier {
    clock: Arc<dyn Clock>,
}

impl SegmentClassifier {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Classify one content delta
    pub fn on_delta(&self, session: &mut StreamSession, delta: &str) -> Vec<SegmentUpdate> {
        if session.finalized || session.cancelled {
            debug!("Session {} ignoring delta after stop", session.session_id);
            return Vec::new();
        }
        self.apply(session, ClassifierEvent::Delta(delta))
    }

    /// Record one tool-activity event as a transcript entry
    pub fn on_activity(&self, session: &mut StreamSession, activity: &ToolActivity) -> Vec<SegmentUpdate> {
        if session.finalized || session.cancelled {
            debug!("Session {} ignoring activity after stop", session.session_id);
            return Vec::new();
        }
        let entry = format!(
            "{} : {}\n\n",
            format_local_timestamp(self.clock.now_millis()),
            activity.transcript_text()
        );
        self.apply(
            session,
            ClassifierEvent::Activity {
                text: &entry,
                is_tool_result: activity.is_tool_result(),
            },
        )
    }

    fn apply(&self, session: &mut StreamSession, event: ClassifierEvent<'_>) -> Vec<SegmentUpdate> {
        let (next, effects) = transition(session.state, event);
        session.state = next;

        let mut updates = Vec::new();
        for effect in effects {
            match effect {
                Effect::EnterThinking => {
                    debug!("Session {} entered reasoning", session.session_id);
                }
                Effect::ExitThinking { close_reasoning } => {
                    if let (true, Some(reasoning)) = (close_reasoning, session.reasoning.as_mut()) {
                        let at = self.clock.now_millis();
                        reasoning.closed_at = Some(at);
                        updates.push(SegmentUpdate::Closed {
                            kind: SegmentKind::Reasoning,
                            at,
                        });
                    }
                }
                Effect::StrayClose => {
                    debug!(
                        "Session {} consumed a closing marker outside reasoning",
                        session.session_id
                    );
                }
                Effect::SuppressBlankReasoning => {}
                Effect::OpenReasoning => {
                    let at = self.clock.now_millis();
                    session.reasoning = Some(Segment::open(SegmentKind::Reasoning, at));
                    updates.push(SegmentUpdate::Opened {
                        kind: SegmentKind::Reasoning,
                        at,
                    });
                }
                Effect::AppendReasoning(text) => {
                    append(&mut session.reasoning, SegmentKind::Reasoning, &text, &mut updates);
                }
                Effect::MarkAnswered => {
                    let at = self.clock.now_millis();
                    session.response_timestamp = Some(at);
                    session.answer = Some(Segment::open(SegmentKind::Answer, at));
                    updates.push(SegmentUpdate::Opened {
                        kind: SegmentKind::Answer,
                        at,
                    });
                }
                Effect::AppendAnswer(text) => {
                    append(&mut session.answer, SegmentKind::Answer, &text, &mut updates);
                }
                Effect::OpenToolActivity => {
                    let at = self.clock.now_millis();
                    session.tool_activity = Some(Segment::open(SegmentKind::ToolActivity, at));
                    updates.push(SegmentUpdate::Opened {
                        kind: SegmentKind::ToolActivity,
                        at,
                    });
                }
                Effect::AppendToolActivity(text) => {
                    append(
                        &mut session.tool_activity,
                        SegmentKind::ToolActivity,
                        &text,
                        &mut updates,
                    );
                }
                Effect::CollapseToolActivity => {
                    updates.push(SegmentUpdate::CollapseToolActivity);
                }
            }
        }
        updates
    }
}

fn append(segment: &mut Option<Segment>, kind: SegmentKind, text: &str, updates: &mut Vec<SegmentUpdate>) {
    if let Some(segment) = segment.as_mut() {
        segment.text.push_str(text);
        updates.push(SegmentUpdate::Appended {
            kind,
            text: text.to_string(),
        });
    }
}

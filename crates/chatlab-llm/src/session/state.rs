//! Classifier state and its pure transition function
//!
//! `transition` decides what a content delta or an activity event does to the
//! session; it never touches buffers or clocks. The caller applies the
//! returned effects.

use chatlab_common::constants::{THINK_CLOSE, THINK_OPEN};
use chatlab_common::is_blank;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    Thinking,
}

/// Classifier flags carried from event to event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassifierState {
    pub mode: Mode,
    pub reasoning_opened: bool,
    pub tool_activity_opened: bool,
    /// Set by the first visible answer delta
    pub answered: bool,
}

/// Input to the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierEvent<'a> {
    Delta(&'a str),
    Activity { text: &'a str, is_tool_result: bool },
}

/// What the caller has to do for one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Opening marker consumed
    EnterThinking,
    /// Closing marker consumed; closes reasoning if it was opened
    ExitThinking { close_reasoning: bool },
    /// Closing marker seen while not thinking
    StrayClose,
    /// Blank delta before any reasoning text
    SuppressBlankReasoning,
    OpenReasoning,
    AppendReasoning(String),
    /// First visible answer delta; record the response timestamp
    MarkAnswered,
    AppendAnswer(String),
    OpenToolActivity,
    AppendToolActivity(String),
    CollapseToolActivity,
}

/// Advance the classifier by one event.
///
/// Markers are matched only as an exact prefix (open) or suffix (close) of a
/// delta, and the whole marker delta is consumed. A marker in the middle of
/// other text, or split across deltas, is treated as ordinary text.
pub fn transition(state: ClassifierState, event: ClassifierEvent<'_>) -> (ClassifierState, Vec<Effect>) {
    let mut next = state;
    let mut effects = Vec::new();

    match event {
        ClassifierEvent::Delta(delta) if delta.starts_with(THINK_OPEN) => {
            next.mode = Mode::Thinking;
            effects.push(Effect::EnterThinking);
        }
        ClassifierEvent::Delta(delta) if delta.ends_with(THINK_CLOSE) => {
            if state.mode == Mode::Thinking {
                next.mode = Mode::Normal;
                effects.push(Effect::ExitThinking {
                    close_reasoning: state.reasoning_opened,
                });
            } else {
                effects.push(Effect::StrayClose);
            }
        }
        ClassifierEvent::Delta(delta) => match state.mode {
            Mode::Thinking => {
                if is_blank(delta) && !state.reasoning_opened {
                    effects.push(Effect::SuppressBlankReasoning);
                } else {
                    if !state.reasoning_opened {
                        next.reasoning_opened = true;
                        effects.push(Effect::OpenReasoning);
                    }
                    effects.push(Effect::AppendReasoning(delta.to_string()));
                }
            }
            Mode::Normal => {
                if !state.answered {
                    next.answered = true;
                    effects.push(Effect::MarkAnswered);
                }
                effects.push(Effect::AppendAnswer(delta.to_string()));
            }
        },
        ClassifierEvent::Activity {
            text,
            is_tool_result,
        } => {
            if !state.tool_activity_opened {
                next.tool_activity_opened = true;
                effects.push(Effect::OpenToolActivity);
            }
            effects.push(Effect::AppendToolActivity(text.to_string()));
            if is_tool_result {
                effects.push(Effect::CollapseToolActivity);
            }
        }
    }

    (next, effects)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(events: &[ClassifierEvent<'_>]) -> (ClassifierState, Vec<Effect>) {
        let mut state = ClassifierState::default();
        let mut all = Vec::new();
        for event in events {
            let (next, effects) = transition(state, *event);
            state = next;
            all.extend(effects);
        }
        (state, all)
    }

    #[test]
    fn test_reasoning_then_answer() {
        let (state, effects) = run(&[
            ClassifierEvent::Delta("<think>"),
            ClassifierEvent::Delta("considering..."),
            ClassifierEvent::Delta("</think>"),
            ClassifierEvent::Delta("Hello"),
        ]);
        assert_eq!(
            effects,
            vec![
                Effect::EnterThinking,
                Effect::OpenReasoning,
                Effect::AppendReasoning("considering...".to_string()),
                Effect::ExitThinking {
                    close_reasoning: true
                },
                Effect::MarkAnswered,
                Effect::AppendAnswer("Hello".to_string()),
            ]
        );
        assert_eq!(state.mode, Mode::Normal);
        assert!(state.answered && state.reasoning_opened);
    }

    #[test]
    fn test_blank_reasoning_suppressed_only_before_content() {
        let (state, effects) = run(&[
            ClassifierEvent::Delta("<think>"),
            ClassifierEvent::Delta("\n\n"),
            ClassifierEvent::Delta("idea"),
            ClassifierEvent::Delta("\n"),
        ]);
        assert_eq!(
            effects,
            vec![
                Effect::EnterThinking,
                Effect::SuppressBlankReasoning,
                Effect::OpenReasoning,
                Effect::AppendReasoning("idea".to_string()),
                Effect::AppendReasoning("\n".to_string()),
            ]
        );
        assert!(!state.answered);
    }

    #[test]
    fn test_empty_think_span_opens_nothing() {
        let (state, effects) = run(&[
            ClassifierEvent::Delta("<think>"),
            ClassifierEvent::Delta("  "),
            ClassifierEvent::Delta("</think>"),
        ]);
        assert!(!state.reasoning_opened);
        assert_eq!(
            effects.last(),
            Some(&Effect::ExitThinking {
                close_reasoning: false
            })
        );
    }

    #[test]
    fn test_markers_only_match_at_edges() {
        let (state, effects) = run(&[ClassifierEvent::Delta("a <think> b")]);
        assert_eq!(state.mode, Mode::Normal);
        assert_eq!(effects[1], Effect::AppendAnswer("a <think> b".to_string()));

        let (_, effects) = run(&[ClassifierEvent::Delta("done</think>")]);
        assert_eq!(effects, vec![Effect::StrayClose]);
    }

    #[test]
    fn test_answer_marked_once() {
        let (_, effects) = run(&[ClassifierEvent::Delta("a"), ClassifierEvent::Delta("b")]);
        assert_eq!(
            effects
                .iter()
                .filter(|e| **e == Effect::MarkAnswered)
                .count(),
            1
        );
    }

    #[test]
    fn test_activity_opens_once_and_collapses_on_result() {
        let (state, effects) = run(&[
            ClassifierEvent::Activity {
                text: "echo",
                is_tool_result: false,
            },
            ClassifierEvent::Activity {
                text: "result",
                is_tool_result: true,
            },
        ]);
        assert!(state.tool_activity_opened);
        assert_eq!(state.mode, Mode::Normal);
        assert_eq!(
            effects,
            vec![
                Effect::OpenToolActivity,
                Effect::AppendToolActivity("echo".to_string()),
                Effect::AppendToolActivity("result".to_string()),
                Effect::CollapseToolActivity,
            ]
        );
    }
}

//! Per-generation session: classification, finalization and cancellation

pub mod cancel;
pub mod classifier;
pub mod finalize;
pub mod state;

// Re-export key types for convenience
pub use cancel::{CancelSignal, CancellationController};
pub use classifier::{Segment, SegmentClassifier, SegmentKind, SegmentUpdate, StreamSession};
pub use finalize::{ChatMeta, FinalizationRecorder, apply_chat_meta};
pub use state::{ClassifierEvent, ClassifierState, Effect, Mode, transition};

//! Chatlab LLM - the streaming response engine
//!
//! This crate provides:
//! - Provider abstraction with a genai-backed implementation
//! - Request assembly from conversation state, retrieval filter and tools
//! - Dispatch of streaming and single-shot generations, tool round trips included
//! - Segment classification of deltas and tool activity into answer,
//!   reasoning and tool-activity runs
//! - Finalization into replayable message metadata, and cancellation

pub mod activity;
pub mod engine;
pub mod genai_provider;
pub mod provider;
pub mod replay;
pub mod request;
pub mod retrieval;
pub mod session;
pub mod streaming;
pub mod tools;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use activity::{ActivitySink, ToolActivity};
pub use engine::{StreamEngine, StreamHandle, StreamOutcome, StreamReport, SubmitRequest};
pub use genai_provider::GenaiProvider;
pub use provider::{
    ChatProvider, ChunkStream, Generation, GenerationChunk, ModelRequest, PromptMessage,
    ResponseMetadata, ToolCallRequest, ToolSpec, Usage,
};
pub use replay::{ReplaySegment, extract_think, replay_message};
pub use request::{ProviderRequest, RequestAssembler, ToolContext, build_filter_expression};
pub use retrieval::{DocumentRetriever, InMemoryDocumentRetriever, RetrievedDocument};
pub use session::{
    CancellationController, ChatMeta, FinalizationRecorder, Segment, SegmentClassifier,
    SegmentKind, SegmentUpdate, StreamSession,
};
pub use streaming::{DeltaStream, DispatchEvent, StreamDispatcher};
pub use tools::{ToolBinding, ToolExecutor};

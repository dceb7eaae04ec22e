//! Response streaming
//!
//! This module contains the dispatcher that drives a provider and turns its
//! output into a stream of content deltas with a terminal event.

pub mod dispatcher;

// Re-export key types for convenience
pub use dispatcher::{DeltaStream, DispatchEvent, StreamDispatcher};

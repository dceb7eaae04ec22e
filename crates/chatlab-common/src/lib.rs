//! Chatlab Common - Shared utilities and types
//!
//! This crate provides the error type, configuration structs, metadata
//! constants, clocks and small helpers used across all chatlab components.

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod utils;

// Re-export commonly used items
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BaseConfig, ChatConfig, ChatOptions, EngineConfig, PlaygroundConfig, ProviderConfig};
pub use error::{ChatlabError, Result};
pub use utils::*;

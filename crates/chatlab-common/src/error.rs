//! Chatlab Common Error Types
//!
//! Centralized error handling for all chatlab components

use std::fmt;

/// Main error type for chatlab operations
#[derive(Debug)]
pub enum ChatlabError {
    /// Generic error with message
    Generic(String),
    /// IO-related errors
    Io(std::io::Error),
    /// JSON serialization/deserialization errors
    Serde(serde_json::Error),
    /// TOML configuration parse errors
    Toml(toml::de::Error),
    /// Conversation storage errors
    Storage(String),
    /// Configuration errors
    Config(String),
}

impl fmt::Display for ChatlabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatlabError::Generic(msg) => write!(f, "chatlab error: {}", msg),
            ChatlabError::Io(err) => write!(f, "IO error: {}", err),
            ChatlabError::Serde(err) => write!(f, "Serialization error: {}", err),
            ChatlabError::Toml(err) => write!(f, "Config parse error: {}", err),
            ChatlabError::Storage(msg) => write!(f, "Storage error: {}", msg),
            ChatlabError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ChatlabError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChatlabError::Io(err) => Some(err),
            ChatlabError::Serde(err) => Some(err),
            ChatlabError::Toml(err) => Some(err),
            _ => None,
        }
    }
}

/// Convenience result type for chatlab operations
pub type Result<T> = std::result::Result<T, ChatlabError>;

impl From<std::io::Error> for ChatlabError {
    fn from(err: std::io::Error) -> Self {
        ChatlabError::Io(err)
    }
}

impl From<serde_json::Error> for ChatlabError {
    fn from(err: serde_json::Error) -> Self {
        ChatlabError::Serde(err)
    }
}

impl From<toml::de::Error> for ChatlabError {
    fn from(err: toml::de::Error) -> Self {
        ChatlabError::Toml(err)
    }
}

impl From<anyhow::Error> for ChatlabError {
    fn from(err: anyhow::Error) -> Self {
        ChatlabError::Generic(err.to_string())
    }
}

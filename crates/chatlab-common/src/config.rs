//! Configuration types and utilities for chatlab

use crate::constants::{DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_UPDATE_BUFFER, timeouts};
use crate::error::{ChatlabError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Base configuration that all components can use
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseConfig {
    pub data_dir: String,
    pub log_level: String,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Provider configuration for LLM services
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider name (e.g., "openai", "anthropic", "ollama")
    pub name: String,
    /// API key (optional, can use environment variables)
    pub api_key: Option<String>,
    /// Base URL for API (optional, uses provider default)
    pub base_url: Option<String>,
    /// Default model to use
    pub default_model: String,
    /// Request timeout in seconds
    pub timeout_seconds: Option<u64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "openai".to_string(),
            api_key: None,
            base_url: None,
            default_model: "gpt-4o-mini".to_string(),
            timeout_seconds: Some(timeouts::DEFAULT_LLM_TIMEOUT),
        }
    }
}

/// Sampling options for a conversation. Every field is optional; unset
/// fields are left to the provider's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatOptions {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// Chat defaults applied to new conversations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// System prompt for new conversations
    pub system_prompt: Option<String>,
    /// Models offered for selection
    pub models: Vec<String>,
    /// Default sampling options
    pub options: ChatOptions,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: Some("You are a helpful assistant.".to_string()),
            models: vec!["gpt-4o-mini".to_string()],
            options: ChatOptions::default(),
        }
    }
}

/// Streaming engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the segment update channel
    pub update_buffer: usize,
    /// Maximum provider/tool round trips per generation
    pub max_tool_rounds: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            update_buffer: DEFAULT_UPDATE_BUFFER,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

/// Top-level playground configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaygroundConfig {
    pub base: BaseConfig,
    pub provider: ProviderConfig,
    pub chat: ChatConfig,
    pub engine: EngineConfig,
}

impl PlaygroundConfig {
    /// Default config file location (`<config dir>/chatlab/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chatlab").join("config.toml"))
    }

    /// Load the configuration, falling back to defaults when the file does not exist
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => {
                debug!("No config directory available, using defaults");
                return Ok(Self::default());
            }
        };

        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: PlaygroundConfig = toml::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ChatlabError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Directory where conversations are saved
    pub fn chat_save_dir(&self) -> PathBuf {
        PathBuf::from(&self.base.data_dir).join("chat").join("save")
    }
}

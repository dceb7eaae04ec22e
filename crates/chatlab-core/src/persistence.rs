//! Flat-file JSON persistence
//!
//! Every saved object lives in its own `<name>.json` file under a save
//! directory. Files are written on shutdown and read back on startup.

use crate::conversation::Conversation;
use async_trait::async_trait;
use chatlab_common::{ChatlabError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Save/load contract for one kind of persisted object
#[async_trait]
pub trait PersistenceService<T: Send + Sync>: Send + Sync {
    /// Directory holding the saved files
    fn save_dir(&self) -> &Path;

    /// Serialize an object into the JSON document that gets written
    fn build_save_data(&self, item: &T) -> Result<Value>;

    /// File stem for an object (without `.json`)
    fn save_file_name(&self, item: &T) -> String;

    /// Rebuild an object from a saved document
    fn convert_to(&self, data: Value) -> Result<T>;

    fn file_path(&self, item: &T) -> PathBuf {
        self.save_dir()
            .join(format!("{}.json", self.save_file_name(item)))
    }

    /// Write one object to its file
    async fn save(&self, item: &T) -> Result<PathBuf> {
        tokio::fs::create_dir_all(self.save_dir()).await?;
        let data = self.build_save_data(item)?;
        let path = self.file_path(item);
        info!("Saving to file: {:?}", path);
        tokio::fs::write(&path, serde_json::to_vec_pretty(&data)?).await?;
        Ok(path)
    }

    /// Read every non-hidden `.json` file in the save directory
    async fn loads(&self) -> Result<Vec<T>> {
        let save_dir = self.save_dir();
        if !tokio::fs::try_exists(save_dir).await? {
            debug!("Save directory {:?} does not exist yet", save_dir);
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        let mut dir = tokio::fs::read_dir(save_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            info!("Load file : {:?}", path);
            let content = tokio::fs::read(&path).await?;
            let data: Value = serde_json::from_slice(&content)?;
            items.push(self.convert_to(data)?);
        }
        Ok(items)
    }

    /// Remove an object's file; a missing file is not an error
    async fn delete(&self, item: &T) -> Result<()> {
        let path = self.file_path(item);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("Failed to delete {:?}: {}", path, e);
                Err(e.into())
            }
        }
    }
}

/// Conversation persistence: `<save_dir>/<conversationId>.json`
pub struct ConversationPersistence {
    save_dir: PathBuf,
}

impl ConversationPersistence {
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
        }
    }
}

#[async_trait]
impl PersistenceService<Conversation> for ConversationPersistence {
    fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    fn build_save_data(&self, item: &Conversation) -> Result<Value> {
        Ok(serde_json::to_value(item)?)
    }

    fn save_file_name(&self, item: &Conversation) -> String {
        item.conversation_id.clone()
    }

    fn convert_to(&self, data: Value) -> Result<Conversation> {
        if data.get("conversationId").and_then(Value::as_str).is_none() {
            return Err(ChatlabError::Storage(
                "saved conversation has no conversationId".to_string(),
            ));
        }
        Ok(serde_json::from_value(data)?)
    }
}

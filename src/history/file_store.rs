//! JSON history files under `<dir>/context/<session>/chat_history.json`

use super::HistoryStore;
use crate::error::{ChatError, Result};
use crate::session::ConversationTurn;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct FileHistoryStore {
    dir: PathBuf,
}

impl FileHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ChatError::Persistence(format!(
                "Invalid session id for file storage: {:?}",
                session_id
            )));
        }
        Ok(self
            .dir
            .join("context")
            .join(session_id)
            .join("chat_history.json"))
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn save(&self, session_id: &str, turns: &[ConversationTurn]) -> Result<()> {
        let path = self.path_for(session_id)?;
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;

        let json = serde_json::to_vec_pretty(turns)?;
        // write-then-rename so readers never see a partial file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("Saved {} turns to {}", turns.len(), path.display());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Vec<ConversationTurn>>> {
        let path = self.path_for(session_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let turns = serde_json::from_slice(&bytes).map_err(|e| {
            ChatError::Persistence(format!("Corrupt history file {}: {}", path.display(), e))
        })?;
        Ok(Some(turns))
    }
}

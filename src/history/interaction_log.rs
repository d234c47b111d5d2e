//! Per-turn Parquet snapshots of the human/assistant exchange

use crate::error::{ChatError, Result};
use chrono::Utc;
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct InteractionLog {
    dir: PathBuf,
}

impl InteractionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one row to `<dir>/data/<uuid>.parquet` and return its path.
    pub fn record(&self, session_id: &str, human_message: &str, ai_message: &str) -> Result<PathBuf> {
        let data_dir = self.dir.join("data");
        std::fs::create_dir_all(&data_dir)?;
        let path = data_dir.join(format!("{}.parquet", Uuid::new_v4()));

        let mut df = df!(
            "connection_id" => &[session_id],
            "human_message" => &[human_message],
            "ai_message" => &[ai_message],
            "created_at" => &[Utc::now().to_rfc3339()],
        )?;

        let mut file = File::create(&path)
            .map_err(|e| ChatError::Persistence(format!("Failed to create {}: {}", path.display(), e)))?;
        ParquetWriter::new(&mut file)
            .finish(&mut df)
            .map_err(|e| ChatError::Persistence(format!("Failed to write {}: {}", path.display(), e)))?;

        Ok(path)
    }
}

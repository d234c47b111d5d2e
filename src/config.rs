//! Configuration - defaults, optional JSON file, then environment overrides

use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on query-generation attempts per turn.
pub const MAX_RETRIES: u32 = 3;

pub const DEFAULT_TABLE_NAME: &str = "CATAPULT_HEALTH_DB.POC_CATAPULT_HEALTH.HEALTHRECORDDATA";

pub const DEFAULT_TABLE_DESCRIPTION: &str = "This table is an electronic health record (EHR) system or a patient health database which has clinical or healthcare data from patients.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub warehouse: WarehouseConfig,
    pub pipeline: PipelineConfig,
    pub history: HistoryConfig,
}

/// Generation service parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key for the OpenAI-compatible endpoint
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Request server-sent events instead of a single completion body
    pub streaming: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4-1106-preview".to_string(),
            temperature: 0.0,
            streaming: true,
        }
    }
}

/// Snowflake connection parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub account: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub role: Option<String>,
    pub warehouse: Option<String>,
    pub database: String,
    pub schema: String,
    /// Overrides `https://<account>.snowflakecomputing.com`
    pub base_url: Option<String>,
}

impl WarehouseConfig {
    pub fn account_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.snowflakecomputing.com", self.account),
        }
    }
}

/// How many fenced SQL blocks of one response are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateMode {
    /// Every block, in source order
    All,
    /// Only the last block
    LastOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub table_name: String,
    pub table_description: String,
    /// Returns `(VARIABLE_NAME, DEFINITION)` rows describing coded columns
    pub metadata_query: Option<String>,
    pub max_retries: u32,
    pub candidate_mode: CandidateMode,
    pub generation_timeout_secs: u64,
    pub execution_timeout_secs: u64,
    /// Rows of a result set serialized into the chart prompt
    pub prompt_row_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            table_description: DEFAULT_TABLE_DESCRIPTION.to_string(),
            metadata_query: None,
            max_retries: MAX_RETRIES,
            candidate_mode: CandidateMode::All,
            generation_timeout_secs: 120,
            execution_timeout_secs: 120,
            prompt_row_limit: 200,
        }
    }
}

impl PipelineConfig {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub dir: PathBuf,
    /// Postgres URL; when set, history goes to Postgres instead of files
    pub database_url: Option<String>,
    /// Write a Parquet snapshot per turn
    pub interaction_log: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("history"),
            database_url: None,
            interaction_log: true,
        }
    }
}

impl AppConfig {
    /// Load defaults, then `path` (if given), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                serde_json::from_str(&text).map_err(|e| {
                    ChatError::Config(format!("Failed to parse {}: {}", path.display(), e))
                })?
            }
            None => AppConfig::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process env in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = lookup("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("LLM_TEMPERATURE") {
            self.llm.temperature = parse_env("LLM_TEMPERATURE", &v)?;
        }
        if let Some(v) = lookup("LLM_STREAMING") {
            self.llm.streaming = parse_env("LLM_STREAMING", &v)?;
        }

        if let Some(v) = lookup("SNOWFLAKE_ACCOUNT") {
            self.warehouse.account = v;
        }
        if let Some(v) = lookup("SNOWFLAKE_USER") {
            self.warehouse.user = v;
        }
        if let Some(v) = lookup("SNOWFLAKE_PASSWORD") {
            self.warehouse.password = v;
        }
        if let Some(v) = lookup("SNOWFLAKE_ROLE") {
            self.warehouse.role = Some(v);
        }
        if let Some(v) = lookup("SNOWFLAKE_WAREHOUSE") {
            self.warehouse.warehouse = Some(v);
        }
        if let Some(v) = lookup("SNOWFLAKE_DATABASE") {
            self.warehouse.database = v;
        }
        if let Some(v) = lookup("SNOWFLAKE_SCHEMA") {
            self.warehouse.schema = v;
        }

        if let Some(v) = lookup("TABLE_NAME") {
            self.pipeline.table_name = v;
        }
        if let Some(v) = lookup("TABLE_DESCRIPTION") {
            self.pipeline.table_description = v;
        }
        if let Some(v) = lookup("METADATA_QUERY") {
            self.pipeline.metadata_query = Some(v);
        }
        if let Some(v) = lookup("MAX_RETRIES") {
            self.pipeline.max_retries = parse_env("MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("EXECUTE_ALL_CANDIDATES") {
            let all: bool = parse_env("EXECUTE_ALL_CANDIDATES", &v)?;
            self.pipeline.candidate_mode = if all {
                CandidateMode::All
            } else {
                CandidateMode::LastOnly
            };
        }

        if let Some(v) = lookup("HISTORY_DIR") {
            self.history.dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DATABASE_URL") {
            self.history.database_url = Some(v);
        }

        Ok(())
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self, remote_llm: bool) -> Result<()> {
        if self.pipeline.max_retries == 0 {
            return Err(ChatError::Config("max_retries must be at least 1".to_string()));
        }
        if self.pipeline.table_name.trim().is_empty() {
            return Err(ChatError::Config("table_name must not be empty".to_string()));
        }
        if remote_llm && self.llm.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ChatError::Config(
                "OPENAI_API_KEY is required for the generation service".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ChatError::Config(format!("Invalid value for {}: {:?}", key, value)))
}

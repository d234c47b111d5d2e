use crate::chart::RenderError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A candidate statement that the data store rejected.
///
/// Carries the raw engine message so the next attempt can be regenerated
/// with it as feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub message: String,
    pub candidate: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>, candidate: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            candidate: candidate.into(),
        }
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Execution error: {0}")]
    Execution(ExecutionError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Chart error: {0}")]
    Render(#[from] RenderError),

    #[error("No valid query after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Session busy: {0}")]
    SessionBusy(String),

    #[error("Invalid turn: {0}")]
    InvalidTurn(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for ChatError {
    fn from(err: polars::error::PolarsError) -> Self {
        ChatError::Polars(err.to_string())
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        ChatError::Database(err.to_string())
    }
}

impl ChatError {
    /// Text shown to the user when a turn ends in this error.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::RetriesExhausted { attempts, .. } => format!(
                "I couldn't build a working query for that after {} attempts. Try rephrasing the question.",
                attempts
            ),
            ChatError::Classification(_) => {
                "Sorry, I couldn't understand that request. Could you rephrase it?".to_string()
            }
            ChatError::Connection(_) => {
                "The data warehouse is unreachable right now. Please try again later.".to_string()
            }
            ChatError::Timeout(_) => "The assistant took too long to respond. Please try again.".to_string(),
            ChatError::SessionBusy(_) => {
                "Still working on your previous message; please wait for it to finish.".to_string()
            }
            _ => "Something went wrong while answering. Please try again.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

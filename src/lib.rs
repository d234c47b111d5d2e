//! tablechat - conversational questions over a warehouse table
//!
//! A turn is classified, then either answered directly or turned into SQL,
//! executed with bounded regeneration on failure, and optionally charted.

pub mod chart;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod execution;
pub mod execution_loop;
pub mod extract;
pub mod generator;
pub mod history;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod session;
pub mod simple;

pub use config::{AppConfig, CandidateMode, MAX_RETRIES};
pub use error::{ChatError, ExecutionError, Result};
pub use orchestrator::{ChartStatus, Orchestrator, TurnOutcome, TurnReport};
pub use session::{ConversationSession, ConversationTurn, Role, SessionRegistry};

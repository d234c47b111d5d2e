//! Conversation history persistence
//!
//! History is saved after every turn and loaded when a session is first
//! used. Storage failures are logged and never fail the turn.

pub mod file_store;
pub mod interaction_log;
pub mod postgres;

pub use file_store::FileHistoryStore;
pub use interaction_log::InteractionLog;
pub use postgres::PgHistoryStore;

use crate::error::Result;
use crate::session::{ConversationSession, ConversationTurn};
use async_trait::async_trait;
use tracing::warn;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save(&self, session_id: &str, turns: &[ConversationTurn]) -> Result<()>;

    /// `Ok(None)` when the session has never been saved.
    async fn load(&self, session_id: &str) -> Result<Option<Vec<ConversationTurn>>>;
}

/// Save `session`, logging instead of failing.
pub async fn save_session(store: &dyn HistoryStore, session: &ConversationSession) {
    if let Err(e) = store.save(&session.id, session.turns()).await {
        warn!("Failed to save history for session {}: {}", session.id, e);
    }
}

/// Load a session, starting empty when nothing usable is stored.
pub async fn load_session(store: &dyn HistoryStore, session_id: &str) -> ConversationSession {
    match store.load(session_id).await {
        Ok(Some(turns)) => match ConversationSession::from_turns(session_id, turns) {
            Ok(session) => session,
            Err(e) => {
                warn!("Stored history for {} is inconsistent, starting fresh: {}", session_id, e);
                ConversationSession::new(session_id)
            }
        },
        Ok(None) => ConversationSession::new(session_id),
        Err(e) => {
            warn!("Failed to load history for {}: {}", session_id, e);
            ConversationSession::new(session_id)
        }
    }
}
